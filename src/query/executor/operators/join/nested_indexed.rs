// Nested Indexed Join
//
// Index-nested-loop join for a small left input. For every distinct
// combination of join values arriving on the left, the right subplan is
// instantiated with those values and run as a separate probe. Up to
// `max_probes` probes run concurrently; while that many are in flight the
// left input is left waiting in its channel. The answers of a finished probe
// are cached so later left rows with the same values do not contact the
// sources again.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use log::debug;

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::engine::spawn_plan;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::join::adaptive::symmetric_join;
use crate::query::executor::operators::{unbound, OperatorStrategy, RightInput};
use crate::query::planner::cardinality::{join_estimate, join_estimate_on, Cardinality};
use crate::query::planner::physical::PlanNode;

/// A running instantiation of the right subplan
struct Probe {
    /// Join values the subplan was instantiated with
    key: Row,
    rx: Receiver<Message>,
    /// Answers received so far
    rows: Vec<Row>,
    /// Left rows waiting on this probe
    waiting: Vec<Row>,
}

/// Probes allowed in flight at once unless configured otherwise
pub const DEFAULT_MAX_PROBES: usize = 16;

#[derive(Debug, Clone)]
pub struct NestedIndexedJoin {
    join_vars: VarSet,
    max_probes: usize,
}

impl NestedIndexedJoin {
    pub fn new(join_vars: VarSet) -> Self {
        NestedIndexedJoin { join_vars, max_probes: DEFAULT_MAX_PROBES }
    }

    /// Limit the number of concurrently running probes (at least one)
    pub fn with_max_probes(mut self, max_probes: usize) -> Self {
        self.max_probes = max_probes.max(1);
        self
    }

    pub fn join_vars(&self) -> &VarSet {
        &self.join_vars
    }

    pub fn max_probes(&self) -> usize {
        self.max_probes
    }

    fn emit(left: &Row, answers: &[Row], out: &Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()> {
        for answer in answers.iter().filter(|a| a.is_compatible(left)) {
            ctx.send(out, Message::Row(left.merge(answer)))?;
        }
        Ok(())
    }

    fn probe_join(
        &self,
        left: Receiver<Message>,
        right: Arc<PlanNode>,
        out: &Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()> {
        let mut finished: HashMap<Row, Vec<Row>> = HashMap::new();
        let mut probes: Vec<Probe> = Vec::new();
        let mut left_open = true;

        while left_open || !probes.is_empty() {
            let reading_left = left_open && probes.len() < self.max_probes;
            let (index, message) = {
                let mut inputs: Vec<&Receiver<Message>> = Vec::with_capacity(probes.len() + 1);
                if reading_left {
                    inputs.push(&left);
                }
                inputs.extend(probes.iter().map(|p| &p.rx));
                ctx.recv_any(&inputs)?
            };

            if reading_left && index == 0 {
                match message {
                    Message::Row(row) => {
                        let key = row.project(&self.join_vars);
                        if let Some(answers) = finished.get(&key) {
                            Self::emit(&row, answers, out, ctx)?;
                        } else if let Some(probe) = probes.iter_mut().find(|p| p.key == key) {
                            Self::emit(&row, &probe.rows, out, ctx)?;
                            probe.waiting.push(row);
                        } else {
                            debug!("Probing right subplan with {}", key);
                            let rx = spawn_plan(Arc::new(right.instantiate(&key)), ctx)?;
                            probes.push(Probe { key, rx, rows: Vec::new(), waiting: vec![row] });
                        }
                    }
                    Message::Unmatched(_) => {}
                    Message::Eof => left_open = false,
                }
                continue;
            }

            let slot = if reading_left { index - 1 } else { index };
            match message {
                Message::Row(answer) => {
                    let probe = &mut probes[slot];
                    for waiting in probe.waiting.iter().filter(|w| answer.is_compatible(w)) {
                        ctx.send(out, Message::Row(waiting.merge(&answer)))?;
                    }
                    probe.rows.push(answer);
                }
                Message::Unmatched(_) => {}
                Message::Eof => {
                    let probe = probes.swap_remove(slot);
                    finished.insert(probe.key, probe.rows);
                }
            }
        }

        debug!("Nested indexed join ran {} probes", finished.len());
        ctx.send(out, Message::Eof)
    }
}

impl OperatorStrategy for NestedIndexedJoin {
    fn name(&self) -> &'static str {
        "NestedIndexedJoin"
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn consumes_subplan(&self) -> bool {
        true
    }

    fn execute(
        &self,
        left: Receiver<Message>,
        right: RightInput,
        out: Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()> {
        match right {
            RightInput::Subplan(plan) => self.probe_join(left, plan, &out, ctx),
            // Already running: nothing to instantiate, join symmetrically
            RightInput::Channel(rx) => symmetric_join(&self.join_vars, left, rx, &out, ctx),
        }
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(NestedIndexedJoin::new(unbound(&self.join_vars, bindings)).with_max_probes(self.max_probes))
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        join_estimate(left, right, &self.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        join_estimate_on(left, right, &self.join_vars, vars)
    }
}
