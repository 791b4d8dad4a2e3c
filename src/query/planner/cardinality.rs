// Cardinality Estimation
//
// Result-size estimates that drive operator selection. Leaves are measured
// with COUNT probes sent to their endpoint; internal nodes combine the
// estimates of their children. Every node memoizes what it computed.
//
// An estimate is `None` when it is unknown, e.g. because the probe failed.
// Unknown values propagate through the combinators, and the planner treats
// them as failing its cardinality gates.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::unbounded;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::common::{Message, VarSet};
use crate::logical::{Query, Service};
use crate::query::planner::physical::PlanNode;
use crate::source::results::lexical_form;
use crate::source::SourceContactor;

/// Approximate number of answers; `None` when unknown
pub type Cardinality = Option<u64>;

/// Runs COUNT probes against the sources
#[derive(Clone)]
pub struct CardinalityEstimator {
    contactor: Arc<dyn SourceContactor>,
    buffer_size: usize,
}

impl CardinalityEstimator {
    pub fn new(contactor: Arc<dyn SourceContactor>, buffer_size: usize) -> Self {
        CardinalityEstimator { contactor, buffer_size }
    }

    /// Run a COUNT query synchronously and read the number out of its single
    /// answer row. The terminating EOF is discarded.
    pub fn probe(&self, endpoint: &str, count_query: &str) -> Cardinality {
        let (tx, rx) = unbounded();
        self.contactor.contact(endpoint, count_query, &tx, self.buffer_size);
        drop(tx);

        let row = match rx.try_iter().next() {
            Some(Message::Row(row)) => row,
            _ => {
                warn!("Cardinality probe against {} returned no answer", endpoint);
                return None;
            }
        };

        let count = row.iter().next().and_then(|(_, value)| parse_count(value));
        match count {
            Some(n) => debug!("Cardinality probe against {}: {}", endpoint, n),
            None => warn!("Cardinality probe against {} returned a non-numeric answer: {}", endpoint, row),
        }
        count
    }

    /// Answers of `service`, or distinct combinations of `vars` when not empty
    pub fn service_cardinality(&self, query: &Query, service: &Service, vars: &VarSet) -> Cardinality {
        let (endpoint, count_query) = service.count_query(query, vars);
        self.probe(&endpoint, &count_query)
    }
}

fn parse_count(value: &str) -> Option<u64> {
    let value = lexical_form(value.trim()).trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Per-node memo of cardinality estimates.
///
/// Join cardinalities are keyed by the variable set itself, so the order in
/// which a caller enumerated the variables does not matter.
#[derive(Debug, Default)]
pub struct CardinalityCache {
    total: OnceCell<Cardinality>,
    by_vars: Mutex<HashMap<VarSet, Arc<OnceCell<Cardinality>>>>,
}

impl CardinalityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached total cardinality, computing it with `estimate` on first use
    pub fn cardinality<F>(&self, estimate: F) -> Cardinality
    where
        F: FnOnce() -> Cardinality,
    {
        *self.total.get_or_init(estimate)
    }

    /// Cached join cardinality over `vars`, computing it on first use.
    /// The map lock is not held while estimating; probes can be slow. Callers
    /// asking for the same set concurrently wait on one estimate.
    pub fn join_cardinality<F>(&self, vars: &VarSet, estimate: F) -> Cardinality
    where
        F: FnOnce() -> Cardinality,
    {
        let cell = Arc::clone(self.by_vars.lock().entry(vars.clone()).or_default());
        *cell.get_or_init(estimate)
    }

    /// Number of distinct variable sets cached so far
    pub fn cached_join_sets(&self) -> usize {
        self.by_vars.lock().len()
    }
}

/// Union: both sides contribute all their answers
pub fn union_estimate(left: Cardinality, right: Cardinality) -> Cardinality {
    Some(left?.saturating_add(right?))
}

/// Join over `shared`: |L|·|R| divided by the larger number of distinct
/// join keys on either side; the plain product when nothing is shared.
pub fn join_estimate(left: &PlanNode, right: &PlanNode, shared: &VarSet) -> Cardinality {
    let lc = left.get_cardinality()?;
    let rc = right.get_cardinality()?;
    let product = lc.saturating_mul(rc);
    if shared.is_empty() {
        return Some(product);
    }
    let ld = left.get_join_cardinality(shared)?;
    let rd = right.get_join_cardinality(shared)?;
    Some(product / ld.max(rd).max(1))
}

/// Distinct combinations of `vars` in a join, bounded by the join size
pub fn join_estimate_on(left: &PlanNode, right: &PlanNode, shared: &VarSet, vars: &VarSet) -> Cardinality {
    let total = join_estimate(left, right, shared)?;
    let lv: VarSet = vars.intersection(left.vars()).cloned().collect();
    let rv: VarSet = vars.intersection(right.vars()).cloned().collect();
    let ld = left.get_join_cardinality(&lv)?;
    let rd = right.get_join_cardinality(&rv)?;
    Some(total.min(ld.saturating_mul(rd)))
}

/// Left outer join: never fewer answers than the left side
pub fn optional_estimate(left: &PlanNode, right: &PlanNode, shared: &VarSet) -> Cardinality {
    Some(join_estimate(left, right, shared)?.max(left.get_cardinality()?))
}

pub fn optional_estimate_on(left: &PlanNode, right: &PlanNode, shared: &VarSet, vars: &VarSet) -> Cardinality {
    let lv: VarSet = vars.intersection(left.vars()).cloned().collect();
    Some(join_estimate_on(left, right, shared, vars)?.max(left.get_join_cardinality(&lv)?))
}
