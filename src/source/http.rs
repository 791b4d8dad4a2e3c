// HTTP Contactor
//
// Evaluates queries with the SPARQL protocol (HTTP GET) and decodes the JSON
// results document once it has been received.

use std::io::BufReader;
use std::time::Duration;

use crossbeam::channel::Sender;
use log::debug;

use crate::common::Message;
use crate::config::FederationConfig;
use crate::source::results::{self, is_json_content_type, SparqlResults};
use crate::source::{SourceContactor, SourceError, SourceResult, SPARQL_RESULTS_JSON};

/// Contactor for standard SPARQL endpoints
pub struct HttpContactor {
    agent: ureq::Agent,
}

impl HttpContactor {
    /// Create a contactor whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        HttpContactor {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(config.request_timeout())
    }
}

impl SourceContactor for HttpContactor {
    fn fetch(
        &self,
        endpoint: &str,
        query: &str,
        out: &Sender<Message>,
        buffer_size: usize,
    ) -> SourceResult<Option<bool>> {
        debug!("Contacting {}", endpoint);
        let response = self
            .agent
            .get(endpoint)
            .query("query", query)
            .set("Accept", SPARQL_RESULTS_JSON)
            .call()
            .map_err(Box::new)?;

        let content_type = response.content_type().to_string();
        if !is_json_content_type(&content_type) {
            return Err(SourceError::FormatMismatch {
                endpoint: endpoint.to_string(),
                content_type,
            });
        }

        let reader = BufReader::with_capacity(buffer_size, response.into_reader());
        let document: SparqlResults = serde_json::from_reader(reader)?;
        results::emit(document, out)
    }
}
