// Streaming Contactor
//
// For proxies that split a large answer into packages: the body is a
// sequence of JSON values (results documents, ASK answers, or single
// bindings) which are decoded one at a time, so rows reach the plan while
// the transfer is still running.

use std::io::{BufReader, Read};
use std::time::Duration;

use crossbeam::channel::Sender;
use log::debug;
use serde::Deserialize;

use crate::common::Message;
use crate::config::FederationConfig;
use crate::source::results::{self, binding_to_row, is_json_content_type, Binding, ResultBindings};
use crate::source::{push_row, SourceContactor, SourceError, SourceResult, SPARQL_RESULTS_JSON};

/// One value of the package stream
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Package {
    Ask { boolean: bool },
    Document { results: ResultBindings },
    Head { head: serde_json::Value },
    Binding(Binding),
}

/// Decode a package stream from `reader`, pushing rows onto `out`
pub fn decode_stream<R: Read>(reader: R, out: &Sender<Message>) -> SourceResult<Option<bool>> {
    let mut answer = None;
    let packages = serde_json::Deserializer::from_reader(reader).into_iter::<Package>();
    for package in packages {
        match package? {
            Package::Ask { boolean } => answer = Some(boolean),
            Package::Document { results } => {
                let document = results::SparqlResults { results: Some(results), boolean: None };
                results::emit(document, out)?;
            }
            Package::Head { head } => debug!("Package stream head: {}", head),
            Package::Binding(binding) => push_row(out, binding_to_row(binding))?,
        }
    }
    Ok(answer)
}

/// Contactor for package-streaming proxies
pub struct StreamingContactor {
    agent: ureq::Agent,
}

impl StreamingContactor {
    pub fn new(timeout: Duration) -> Self {
        StreamingContactor {
            agent: ureq::AgentBuilder::new().timeout_read(timeout).build(),
        }
    }

    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(config.request_timeout())
    }
}

impl SourceContactor for StreamingContactor {
    fn fetch(
        &self,
        endpoint: &str,
        query: &str,
        out: &Sender<Message>,
        buffer_size: usize,
    ) -> SourceResult<Option<bool>> {
        debug!("Streaming answer from {}", endpoint);
        let response = self
            .agent
            .get(endpoint)
            .query("query", query)
            .query("format", SPARQL_RESULTS_JSON)
            .call()
            .map_err(Box::new)?;

        let content_type = response.content_type().to_string();
        if !is_json_content_type(&content_type) {
            return Err(SourceError::FormatMismatch {
                endpoint: endpoint.to_string(),
                content_type,
            });
        }

        decode_stream(BufReader::with_capacity(buffer_size, response.into_reader()), out)
    }
}
