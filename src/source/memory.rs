// In-Memory Contactor
//
// Deterministic in-process sources. Each endpoint holds a fixed set of rows;
// a query returns the rows consistent with the constants it binds, projected
// onto the variables it still mentions, which is how a real endpoint answers
// an instantiated subquery. COUNT probes are answered from a configured
// value or the number of stored rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::common::{Message, Row};
use crate::logical::template::mentions_var;
use crate::logical::Term;
use crate::source::{push_row, SourceContactor, SourceError, SourceResult};

#[derive(Debug, Clone, Default)]
struct MemorySource {
    rows: Vec<Row>,
    count: Option<u64>,
    row_delay: Option<Duration>,
    failing: bool,
    failing_probes: bool,
    ask: Option<bool>,
}

/// Contactor answering from rows held in memory
#[derive(Debug, Default)]
pub struct InMemoryContactor {
    sources: HashMap<String, MemorySource>,
    probes: AtomicUsize,
    requests: Mutex<Vec<(String, String)>>,
}

impl InMemoryContactor {
    pub fn new() -> Self {
        Self::default()
    }

    fn source(&mut self, endpoint: &str) -> &mut MemorySource {
        self.sources.entry(endpoint.to_string()).or_default()
    }

    /// Rows stored at `endpoint`
    pub fn with_rows(mut self, endpoint: &str, rows: Vec<Row>) -> Self {
        self.source(endpoint).rows.extend(rows);
        self
    }

    /// Fixed answer to every COUNT probe against `endpoint`
    pub fn with_count(mut self, endpoint: &str, count: u64) -> Self {
        self.source(endpoint).count = Some(count);
        self
    }

    /// Sleep before each row, to simulate a slow or bursty source
    pub fn with_delay(mut self, endpoint: &str, delay: Duration) -> Self {
        self.source(endpoint).row_delay = Some(delay);
        self
    }

    /// Make every request to `endpoint` fail
    pub fn with_failure(mut self, endpoint: &str) -> Self {
        self.source(endpoint).failing = true;
        self
    }

    /// Make only the COUNT probes against `endpoint` fail
    pub fn with_probe_failure(mut self, endpoint: &str) -> Self {
        self.source(endpoint).failing_probes = true;
        self
    }

    /// Answer of ASK queries sent to `endpoint`
    pub fn with_ask(mut self, endpoint: &str, answer: bool) -> Self {
        self.source(endpoint).ask = Some(answer);
        self
    }

    /// Number of COUNT probes received so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Every (endpoint, query) received, in arrival order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }

    /// Number of non-probe requests sent to `endpoint`
    pub fn request_count(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(e, q)| e == endpoint && !is_count_query(q))
            .count()
    }
}

/// True for the COUNT probes generated by the planner
pub fn is_count_query(query: &str) -> bool {
    query.contains("(COUNT(")
}

/// A stored row answers `query` when every variable the query no longer
/// mentions has its value spelled out as a constant.
fn answers(row: &Row, query: &str) -> Option<Row> {
    let mut projected = Row::new();
    for (var, value) in row.iter() {
        if mentions_var(query, var) {
            projected.set(var, value);
        } else {
            let constant = Term::from_value(value).to_string();
            if !mentions_constant(query, &constant) {
                return None;
            }
        }
    }
    Some(projected)
}

/// True when `constant` appears in `query` as a whole term, so `"A"` is not
/// found inside `"A"@en`
fn mentions_constant(query: &str, constant: &str) -> bool {
    query.match_indices(constant).any(|(at, _)| {
        query[at + constant.len()..]
            .chars()
            .next()
            .is_none_or(|c| c.is_whitespace() || ".;,})".contains(c))
    })
}

impl SourceContactor for InMemoryContactor {
    fn fetch(
        &self,
        endpoint: &str,
        query: &str,
        out: &Sender<Message>,
        _buffer_size: usize,
    ) -> SourceResult<Option<bool>> {
        self.requests.lock().push((endpoint.to_string(), query.to_string()));
        let source = self
            .sources
            .get(endpoint)
            .ok_or_else(|| SourceError::Unavailable(endpoint.to_string()))?;

        if is_count_query(query) {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if source.failing || source.failing_probes {
                return Err(SourceError::Unavailable(endpoint.to_string()));
            }
            let count = source.count.unwrap_or(source.rows.len() as u64);
            push_row(out, Row::from_pairs([("cnt", count.to_string())]))?;
            return Ok(None);
        }

        if source.failing {
            return Err(SourceError::Unavailable(endpoint.to_string()));
        }
        if source.ask.is_some() {
            return Ok(source.ask);
        }

        for row in &source.rows {
            if let Some(delay) = source.row_delay {
                thread::sleep(delay);
            }
            if let Some(answer) = answers(row, query) {
                push_row(out, answer)?;
            }
        }
        Ok(None)
    }
}
