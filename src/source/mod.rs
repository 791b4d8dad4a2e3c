// Source Contactors
//
// A contactor sends a query to a remote endpoint and pushes the decoded
// answer onto a channel: zero or more rows followed by exactly one EOF.
// Failures are contained here; a failing source looks like an empty one.

pub mod http;
pub mod memory;
pub mod results;
pub mod stream;

use crossbeam::channel::Sender;
use log::{debug, warn};
use thiserror::Error;

use crate::common::{Message, Row};

pub use self::http::HttpContactor;
pub use self::memory::InMemoryContactor;
pub use self::stream::StreamingContactor;

/// Media type requested from every endpoint
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Errors raised while contacting a source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed answer: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source {endpoint} answered in {content_type} instead of JSON")]
    FormatMismatch { endpoint: String, content_type: String },

    #[error("Source {0} is unavailable")]
    Unavailable(String),

    #[error("Receiver dropped before the answer was delivered")]
    ReceiverGone,
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Capability to evaluate a query against a remote endpoint
pub trait SourceContactor: Send + Sync {
    /// Evaluate `query` at `endpoint`, pushing every answer row onto `out` as
    /// soon as it is decoded. Returns the answer of boolean (ASK) queries.
    /// Implementations never push `Eof`; `contact` does.
    fn fetch(
        &self,
        endpoint: &str,
        query: &str,
        out: &Sender<Message>,
        buffer_size: usize,
    ) -> SourceResult<Option<bool>>;

    /// Evaluate `query` and terminate `out` with exactly one `Eof`, whatever
    /// happened. Failures are logged and surface as an empty answer.
    fn contact(
        &self,
        endpoint: &str,
        query: &str,
        out: &Sender<Message>,
        buffer_size: usize,
    ) -> Option<bool> {
        let answer = match self.fetch(endpoint, query, out, buffer_size) {
            Ok(answer) => answer,
            Err(SourceError::ReceiverGone) => {
                debug!("Consumer of {} went away, dropping answer", endpoint);
                return None;
            }
            Err(e @ SourceError::FormatMismatch { .. }) => {
                warn!("{}, the answer will be ignored", e);
                None
            }
            Err(e) => {
                warn!("Contacting {} failed: {}", endpoint, e);
                None
            }
        };
        let _ = out.send(Message::Eof);
        answer
    }
}

/// Push one decoded row, reporting a vanished consumer
pub(crate) fn push_row(out: &Sender<Message>, row: Row) -> SourceResult<()> {
    out.send(Message::Row(row)).map_err(|_| SourceError::ReceiverGone)
}
