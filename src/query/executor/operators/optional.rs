// Optional Operators
//
// Left outer joins. Every left row is emitted at least once: merged with
// each compatible right row, or on its own when nothing matches. Unmatched
// left rows are padded with the empty literal for the right-only
// variables.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::common::{Message, Row, VarSet};
use crate::query::executor::context::ExecutionContext;
use crate::query::executor::error::ExecResult;
use crate::query::executor::operators::join::JoinTable;
use crate::query::executor::operators::{
    drain, for_each_row, unbound, Event, Inputs, OperatorStrategy, RightInput, Side,
};
use crate::query::planner::cardinality::{optional_estimate, optional_estimate_on, Cardinality};
use crate::query::planner::physical::PlanNode;

/// Variables of an optional: the shared ones and those only the right side binds
#[derive(Debug, Clone)]
struct OptionalVars {
    join_vars: VarSet,
    right_vars: VarSet,
}

impl OptionalVars {
    fn new(join_vars: VarSet, right_vars: VarSet) -> Self {
        OptionalVars { join_vars, right_vars }
    }

    fn instantiate(&self, bindings: &Row) -> Self {
        OptionalVars {
            join_vars: unbound(&self.join_vars, bindings),
            right_vars: unbound(&self.right_vars, bindings),
        }
    }
}

/// Emit `left` merged with each of `matches`, or padded when there are none
fn emit_left<'a, I>(left: &Row, matches: I, pad: &VarSet, out: &Sender<Message>, ctx: &ExecutionContext) -> ExecResult<()>
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut matched = false;
    for right in matches {
        matched = true;
        ctx.send(out, Message::Row(left.merge(right)))?;
    }
    if !matched {
        ctx.send(out, Message::Row(left.pad(pad)))?;
    }
    Ok(())
}

/// Blocking optional: the right input is hashed, then left rows stream past it
#[derive(Debug, Clone)]
pub struct HashOptional {
    vars: OptionalVars,
}

impl HashOptional {
    /// `right_vars` are the variables of the right (optional) side
    pub fn new(join_vars: VarSet, right_vars: VarSet) -> Self {
        HashOptional { vars: OptionalVars::new(join_vars, right_vars) }
    }
}

impl OperatorStrategy for HashOptional {
    fn name(&self) -> &'static str {
        "HashOptional"
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
        let mut table = JoinTable::new(self.vars.join_vars.clone());
        for_each_row(&right, ctx, |row| {
            table.insert(row);
            Ok(())
        })?;

        for_each_row(&left, ctx, |row| emit_left(&row, table.matches(&row), &self.vars.right_vars, &out, ctx))?;
        ctx.send(&out, Message::Eof)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(HashOptional { vars: self.vars.instantiate(bindings) })
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        optional_estimate(left, right, &self.vars.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        optional_estimate_on(left, right, &self.vars.join_vars, vars)
    }
}

/// Blocking optional comparing every left row with the whole right input
#[derive(Debug, Clone)]
pub struct NestedLoopOptional {
    vars: OptionalVars,
}

impl NestedLoopOptional {
    pub fn new(join_vars: VarSet, right_vars: VarSet) -> Self {
        NestedLoopOptional { vars: OptionalVars::new(join_vars, right_vars) }
    }
}

impl OperatorStrategy for NestedLoopOptional {
    fn name(&self) -> &'static str {
        "NestedLoopOptional"
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
            let matches = inner.iter().filter(|r| r.is_compatible(&row));
            emit_left(&row, matches, &self.vars.right_vars, &out, ctx)
        })?;
        ctx.send(&out, Message::Eof)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(NestedLoopOptional { vars: self.vars.instantiate(bindings) })
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        optional_estimate(left, right, &self.vars.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        optional_estimate_on(left, right, &self.vars.join_vars, vars)
    }
}

/// Non-blocking optional.
///
/// Matches are emitted as soon as both rows have arrived, like the adaptive
/// join. Whether a left row has a match is only known once the right input
/// is exhausted, so left rows still unmatched at that point are emitted
/// padded, and later left rows go out padded right away.
#[derive(Debug, Clone)]
pub struct AdaptiveOptional {
    vars: OptionalVars,
}

impl AdaptiveOptional {
    pub fn new(join_vars: VarSet, right_vars: VarSet) -> Self {
        AdaptiveOptional { vars: OptionalVars::new(join_vars, right_vars) }
    }
}

impl OperatorStrategy for AdaptiveOptional {
    fn name(&self) -> &'static str {
        "AdaptiveOptional"
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
        let pad = &self.vars.right_vars;
        let mut left_table = JoinTable::new(self.vars.join_vars.clone());
        let mut matched: Vec<bool> = Vec::new();
        let mut right_table = JoinTable::new(self.vars.join_vars.clone());
        let mut right_done = false;
        let mut inputs = Inputs::new(left, right.into_channel(ctx)?);

        while let Some(event) = inputs.next_event(ctx)? {
            match event {
                Event::Row(Side::Left, row) if right_done => {
                    emit_left(&row, right_table.matches(&row), pad, &out, ctx)?;
                }
                Event::Row(Side::Left, row) => {
                    let mut found = false;
                    for right_row in right_table.matches(&row) {
                        found = true;
                        ctx.send(&out, Message::Row(row.merge(right_row)))?;
                    }
                    left_table.insert(row);
                    matched.push(found);
                }
                Event::Row(Side::Right, row) => {
                    for i in left_table.matching(&row) {
                        ctx.send(&out, Message::Row(left_table.rows()[i].merge(&row)))?;
                        matched[i] = true;
                    }
                    right_table.insert(row);
                }
                Event::Closed(Side::Right) => {
                    right_done = true;
                    for (row, _) in left_table.rows().iter().zip(&matched).filter(|(_, m)| !**m) {
                        ctx.send(&out, Message::Row(row.pad(pad)))?;
                    }
                }
                Event::Closed(Side::Left) => {}
            }
        }

        ctx.send(&out, Message::Eof)
    }

    fn instantiate(&self, bindings: &Row) -> Arc<dyn OperatorStrategy> {
        Arc::new(AdaptiveOptional { vars: self.vars.instantiate(bindings) })
    }

    fn cardinality(&self, left: &PlanNode, right: &PlanNode) -> Cardinality {
        optional_estimate(left, right, &self.vars.join_vars)
    }

    fn join_cardinality(&self, left: &PlanNode, right: &PlanNode, vars: &VarSet) -> Cardinality {
        optional_estimate_on(left, right, &self.vars.join_vars, vars)
    }
}
