// Adaptive Join
//
// Symmetric hash join. Each input keeps its own table; a row arriving on
// either side is inserted into its table and probed against the other, so
// answers flow as soon as matching rows have arrived, whatever the order
// and pace of the two sources.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::join::JoinTable;
use crate::query::executor::operators::{unbound, Inputs, OperatorStrategy, RightInput, Side};
use crate::query::planner::cardinality::{join_estimate, join_estimate_on, Cardinality};
use crate::query::planner::physical::PlanNode;

#[derive(Debug, Clone)]
pub struct AdaptiveJoin {
    join_vars: VarSet,
}

impl AdaptiveJoin {
    pub fn new(join_vars: VarSet) -> Self {
        AdaptiveJoin { join_vars }
    }

    pub fn join_vars(&self) -> &VarSet {
        &self.join_vars
    }
}

/// Symmetric hash join over two running inputs
pub(crate) fn symmetric_join(
    join_vars: &VarSet,
    left: Receiver<Message>,
    right: Receiver<Message>,
    out: &Sender<Message>,
    ctx: &ExecutionContext,
) -> ExecResult<()> {
    let mut left_table = JoinTable::new(join_vars.clone());
    let mut right_table = JoinTable::new(join_vars.clone());
    let mut inputs = Inputs::new(left, right);

    while let Some((side, row)) = inputs.next(ctx)? {
        match side {
            Side::Left => {
                for matched in right_table.matches(&row) {
                    ctx.send(out, Message::Row(row.merge(matched)))?;
                }
                left_table.insert(row);
            }
            Side::Right => {
                for matched in left_table.matches(&row) {
                    ctx.send(out, Message::Row(matched.merge(&row)))?;
                }
                right_table.insert(row);
            }
        }
    }

    ctx.send(out, Message::Eof)
}

impl OperatorStrategy for AdaptiveJoin {
    fn name(&self) -> &'static str {
        "AdaptiveJoin"
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn execute(
        &self,
        left: Receiver<Message>,
        right: RightInput,
        out: Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()> {
        symmetric_join(&self.join_vars, left, right.into_channel(ctx)?, &out, ctx)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(AdaptiveJoin::new(unbound(&self.join_vars, bindings)))
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        join_estimate(left, right, &self.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        join_estimate_on(left, right, &self.join_vars, vars)
    }
}
