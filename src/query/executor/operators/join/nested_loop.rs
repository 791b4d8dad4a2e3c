// Nested Loop Join Implementation
//
// Blocking join: the right input is materialized, then every left row is
// compared against all of it as it arrives.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::{drain, for_each_row, unbound, OperatorStrategy, RightInput};
use crate::query::planner::cardinality::{join_estimate, join_estimate_on, Cardinality};
use crate::query::planner::physical::PlanNode;

/// Nested Loop Join operator implementation
#[derive(Debug, Clone)]
pub struct NestedLoopJoin {
    join_vars: VarSet,
}

impl NestedLoopJoin {
    pub fn new(join_vars: VarSet) -> Self {
        NestedLoopJoin { join_vars }
    }
}

impl OperatorStrategy for NestedLoopJoin {
    fn name(&self) -> &'static str {
        "NestedLoopJoin"
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn execute(
        &self,
        left: Receiver<Message>,
        right: RightInput,
        out: Sender<Message>,
        ctx: &ExecutionContext,
    ) -> ExecResult<()> {
        let inner = drain(&right.into_channel(ctx)?, ctx)?;

        for_each_row(&left, ctx, |row| {
            for candidate in inner.iter().filter(|r| r.is_compatible(&row)) {
                ctx.send(&out, Message::Row(row.merge(candidate)))?;
            }
            Ok(())
        })?;

        ctx.send(&out, Message::Eof)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(NestedLoopJoin::new(unbound(&self.join_vars, bindings)))
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        join_estimate(left, right, &self.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        join_estimate_on(left, right, &self.join_vars, vars)
    }
}
