// Union Operators
//
// Both strategies emit every answer of both inputs. Rows are padded with
// the empty literal for the variables only the other side binds, so every
// emitted row binds the node's full variable set.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::{for_each_row, unbound, Inputs, OperatorStrategy, RightInput};
use crate::query::planner::cardinality::{union_estimate, Cardinality};
use crate::query::planner::physical::PlanNode;

/// Output side of a union: padding plus optional duplicate elimination
struct UnionOutput<'a> {
    vars: VarSet,
    seen: Option<HashSet<Row>>,
    out: &'a Sender<Message>,
    ctx: &'a ExecutionContext,
}

impl<'a> UnionOutput<'a> {
    fn new(left_vars: &VarSet, right_vars: &VarSet, distinct: bool, out: &'a Sender<Message>, ctx: &'a ExecutionContext) -> Self {
        UnionOutput {
            vars: left_vars.union(right_vars).cloned().collect(),
            seen: distinct.then(HashSet::new),
            out,
            ctx,
        }
    }

    fn emit(&mut self, row: Row) -> ExecResult<()> {
        let row = row.pad(&self.vars);
        if let Some(seen) = self.seen.as_mut() {
            if !seen.insert(row.clone()) {
                return Ok(());
            }
        }
        self.ctx.send(self.out, Message::Row(row))
    }

    fn finish(self) -> ExecResult<()> {
        self.ctx.send(self.out, Message::Eof)
    }
}

/// Blocking union: all of the left input, then all of the right input
#[derive(Debug, Clone)]
pub struct Union {
    left_vars: VarSet,
    right_vars: VarSet,
    distinct: bool,
}

impl Union {
    pub fn new(left_vars: VarSet, right_vars: VarSet, distinct: bool) -> Self {
        Union { left_vars, right_vars, distinct }
    }
}

impl OperatorStrategy for Union {
    fn name(&self) -> &'static str {
        "Union"
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
        let mut output = UnionOutput::new(&self.left_vars, &self.right_vars, self.distinct, &out, ctx);
        for_each_row(&left, ctx, |row| output.emit(row))?;
        for_each_row(&right, ctx, |row| output.emit(row))?;
        output.finish()
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(Union {
            left_vars: unbound(&self.left_vars, bindings),
            right_vars: unbound(&self.right_vars, bindings),
            distinct: self.distinct,
        })
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        union_estimate(left.get_cardinality(), right.get_cardinality())
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        union_estimate(left.get_join_cardinality(vars), right.get_join_cardinality(vars))
    }
}

/// Non-blocking union: answers are relayed from whichever input has one
#[derive(Debug, Clone)]
pub struct AdaptiveUnion {
    left_vars: VarSet,
    right_vars: VarSet,
    distinct: bool,
}

impl AdaptiveUnion {
    pub fn new(left_vars: VarSet, right_vars: VarSet, distinct: bool) -> Self {
        AdaptiveUnion { left_vars, right_vars, distinct }
    }
}

impl OperatorStrategy for AdaptiveUnion {
    fn name(&self) -> &'static str {
        "AdaptiveUnion"
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
        let mut inputs = Inputs::new(left, right.into_channel(ctx)?);
        let mut output = UnionOutput::new(&self.left_vars, &self.right_vars, self.distinct, &out, ctx);
        while let Some((_, row)) = inputs.next(ctx)? {
            output.emit(row)?;
        }
        output.finish()
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(AdaptiveUnion {
            left_vars: unbound(&self.left_vars, bindings),
            right_vars: unbound(&self.right_vars, bindings),
            distinct: self.distinct,
        })
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        union_estimate(left.get_cardinality(), right.get_cardinality())
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        union_estimate(left.get_join_cardinality(vars), right.get_join_cardinality(vars))
    }
}
