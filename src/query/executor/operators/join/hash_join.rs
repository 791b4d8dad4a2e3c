// Hash Join Implementation
//
// Blocking join: the left input is materialized into a hash table on the
// join variables before the first right row is looked at.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::join::JoinTable;
use crate::query::executor::operators::{for_each_row, unbound, OperatorStrategy, RightInput};
use crate::query::planner::cardinality::{join_estimate, join_estimate_on, Cardinality};
use crate::query::planner::physical::PlanNode;

/// Hash Join operator implementation
#[derive(Debug, Clone)]
pub struct HashJoin {
    /// Variables shared by both inputs
    join_vars: VarSet,
}

impl HashJoin {
    /// Create a new hash join over the shared variables
    pub fn new(join_vars: VarSet) -> Self {
        HashJoin { join_vars }
    }

    pub fn join_vars(&self) -> &VarSet {
        &self.join_vars
    }
}

impl OperatorStrategy for HashJoin {
    fn name(&self) -> &'static str {
        "HashJoin"
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
        let right = right.into_channel(ctx)?;

        // Build phase
        let mut table = JoinTable::new(self.join_vars.clone());
        for_each_row(&left, ctx, |row| {
            table.insert(row);
            Ok(())
        })?;

        // Probe phase
        for_each_row(&right, ctx, |row| {
            for matched in table.matches(&row) {
                ctx.send(&out, Message::Row(matched.merge(&row)))?;
            }
            Ok(())
        })?;

        ctx.send(&out, Message::Eof)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(HashJoin::new(unbound(&self.join_vars, bindings)))
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        join_estimate(left, right, &self.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        join_estimate_on(left, right, &self.join_vars, vars)
    }
}
