// Operator Strategies
//
// This module defines the algorithms a binary plan node can combine its two
// inputs with. Blocking strategies materialize one or both inputs before
// producing anything; adaptive ones produce answers as soon as rows arrive
// on either side, in whatever order the sources deliver them.
//
// Every strategy reads its inputs until EOF, writes its answers to `out`,
// and terminates `out` with exactly one EOF.

pub mod join;
pub mod optional;
pub mod union;

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::engine::spawn_plan;
use crate::query::executor::error::ExecResult;
use crate::query::planner::cardinality::Cardinality;
use crate::query::planner::physical::PlanNode;

pub use self::join::{AdaptiveJoin, HashJoin, NestedIndexedJoin, NestedLoopJoin};
pub use self::optional::{AdaptiveOptional, HashOptional, NestedLoopOptional};
pub use self::union::{AdaptiveUnion, Union};

/// What a strategy receives for its right input
pub enum RightInput {
    /// Rows of an already running right subplan
    Channel(Receiver<Message>),
    /// The right subplan itself, not yet evaluated
    Subplan(Arc<PlanNode>),
}

impl RightInput {
    /// Rows of the right input, starting the subplan if needed
    pub fn into_channel(self, ctx: &ExecutionContext) -> ExecResult<Receiver<Message>> {
        match self {
            RightInput::Channel(rx) => Ok(rx),
            RightInput::Subplan(plan) => spawn_plan(plan, ctx),
        }
    }
}

/// An algorithm combining the two inputs of a binary plan node
pub trait OperatorStrategy: Send + Sync + fmt::Debug {
    /// Name shown in plan explanations
    fn name(&self) -> &'static str;

    /// Whether the strategy materializes an input before producing answers
    fn is_blocking(&self) -> bool;

    /// Whether the strategy evaluates the right subplan itself. The engine
    /// then hands it the subplan instead of starting a worker for it.
    fn consumes_subplan(&self) -> bool {
        false
    }

    /// Consume both inputs and write the answers, then one EOF, to `out`
    fn execute(
        &self,
        left: Receiver<Message>,
        right: RightInput,
        out: Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()>;

    /// Same strategy with the variables of `bindings` no longer free
    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy>;

    /// Estimated number of answers over the given children
    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality;

    /// Estimated number of distinct combinations of `vars` in the answers
    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality;
}

/// Variable set without the variables bound by `bindings`
pub(crate) fn unbound(vars: &VarSet, bindings: &Row) -> VarSet {
    vars.iter().filter(|v| !bindings.contains(v)).cloned().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// Item read by `Inputs`
#[derive(Debug)]
pub(crate) enum Event {
    Row(Side, Row),
    /// The side reached its EOF
    Closed(Side),
}

/// Reader over both inputs of an operator, yielding rows in arrival order
pub(crate) struct Inputs {
    left: Option<Receiver<Message>>,
    right: Option<Receiver<Message>>,
}

impl Inputs {
    pub(crate) fn new(left: Receiver<Message>, right: Receiver<Message>) -> Self {
        Inputs { left: Some(left), right: Some(right) }
    }

    /// Next row or EOF from whichever side has one; `None` once both sides
    /// are closed
    pub(crate) fn next_event(&mut self, ctx: &ExecutionContext) -> ExecResult<Option<Event>> {
        loop {
            let (side, message) = match (&self.left, &self.right) {
                (Some(left), Some(right)) => {
                    let (index, message) = ctx.recv_any(&[left, right])?;
                    (if index == 0 { Side::Left } else { Side::Right }, message)
                }
                (Some(left), None) => (Side::Left, ctx.recv(left)?),
                (None, Some(right)) => (Side::Right, ctx.recv(right)?),
                (None, None) => return Ok(None),
            };

            match message {
                Message::Row(row) => return Ok(Some(Event::Row(side, row))),
                Message::Unmatched(_) => {}
                Message::Eof => {
                    match side {
                        Side::Left => self.left = None,
                        Side::Right => self.right = None,
                    }
                    return Ok(Some(Event::Closed(side)));
                }
            }
        }
    }

    /// Next row from whichever side has one; `None` once both sides are at EOF
    pub(crate) fn next(&mut self, ctx: &ExecutionContext) -> ExecResult<Option<(Side, Row)>> {
        while let Some(event) = self.next_event(ctx)? {
            if let Event::Row(side, row) = event {
                return Ok(Some((side, row)));
            }
        }
        Ok(None)
    }
}

/// Call `f` on every row of `input` until its EOF
pub(crate) fn for_each_row<F>(input: &Receiver<Message>, ctx: &ExecutionContext, mut f: F) -> ExecResult<()>
where
    F: FnMut(Row) -> ExecResult<()>,
{
    loop {
        match ctx.recv(input)? {
            Message::Row(row) => f(row)?,
            Message::Unmatched(_) => {}
            Message::Eof => return Ok(()),
        }
    }
}

/// Materialize every row of `input`
pub(crate) fn drain(input: &Receiver<Message>, ctx: &ExecutionContext) -> ExecResult<Vec<Row>> {
    let mut rows = Vec::new();
    for_each_row(input, ctx, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}
