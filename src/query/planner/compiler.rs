// Plan Compiler
//
// Translates a decomposed query into a physical plan. Each union, join and
// optional of the logical tree becomes a binary plan node; the operator
// strategy is picked per node from the global `adaptive` setting and, for
// joins, from cardinality estimates of the inputs.

use std::sync::Arc;

use log::debug;

use crate::common::VarSet;
use crate::logical::{JoinBlock, JoinElement, LeafSource, Query, Tree, UnionBlock};
use crate::query::executor::operators::{
    AdaptiveJoin, AdaptiveOptional, AdaptiveUnion, HashJoin, HashOptional, NestedIndexedJoin, OperatorStrategy, Union,
};
use crate::query::planner::error::{PlanningError, PlanningResult};
use crate::query::planner::physical::{LeafOperator, PlanNode};
use crate::source::SourceContactor;

/// Largest left input, in answers, for which a nested indexed join is considered
pub const NESTED_JOIN_MAX_LEFT: u64 = 30;

/// Largest left/right size ratio for a nested indexed join when the right
/// input is selective
pub const NESTED_JOIN_MAX_RATIO: f64 = 0.3;

/// Smallest share of constant positions the left input of a nested indexed
/// join must have
pub const NESTED_JOIN_MIN_CONSTANTS: f64 = 0.5;

/// Whether a nested indexed join suits `left ⋈ right`.
///
/// The checks run in order and stop at the first failing one, so the right
/// input is only probed when its size matters. An unknown cardinality fails
/// its check.
pub fn prefers_nested_join(left: &PlanNode, right: &PlanNode, shared: &VarSet) -> bool {
    if left.all_triples_low_selectivity() || shared.is_empty() {
        return false;
    }

    let Some(lc) = left.get_cardinality() else {
        return false;
    };
    if lc > NESTED_JOIN_MAX_LEFT {
        return false;
    }

    if !right.all_triples_low_selectivity() {
        match right.get_cardinality() {
            Some(rc) if lc as f64 <= NESTED_JOIN_MAX_RATIO * rc as f64 => {}
            _ => return false,
        }
    }

    left.constant_percentage() >= NESTED_JOIN_MIN_CONSTANTS
}

/// Compiles logical trees into physical plans
pub struct PlanCompiler {
    adaptive: bool,
    buffer_size: usize,
    contactor: Arc<dyn SourceContactor>,
}

impl PlanCompiler {
    /// With `adaptive` off only blocking strategies are used
    pub fn new(adaptive: bool, buffer_size: usize, contactor: Arc<dyn SourceContactor>) -> Self {
        PlanCompiler { adaptive, buffer_size, contactor }
    }

    /// Compile `query`. A query without any join block has no plan.
    pub fn compile(&self, query: &Query) -> PlanningResult<Option<PlanNode>> {
        let query = Arc::new(query.clone());
        let plan = self.compile_union(&query, &query.body)?;
        if let Some(plan) = &plan {
            debug!("Compiled plan:\n{}", plan);
        }
        Ok(plan)
    }

    fn compile_union(&self, query: &Arc<Query>, union: &UnionBlock) -> PlanningResult<Option<PlanNode>> {
        let mut plan: Option<PlanNode> = None;
        for block in &union.join_blocks {
            let node = self.compile_join_block(query, block)?;
            plan = Some(match plan {
                None => node,
                Some(acc) => self.union_node(query.distinct, acc, node),
            });
        }
        Ok(plan)
    }

    fn compile_nested_union(&self, query: &Arc<Query>, union: &UnionBlock) -> PlanningResult<PlanNode> {
        self.compile_union(query, union)?.ok_or(PlanningError::EmptyUnion)
    }

    fn compile_join_block(&self, query: &Arc<Query>, block: &JoinBlock) -> PlanningResult<PlanNode> {
        let mut required = Vec::new();
        let mut optionals = Vec::new();
        for element in &block.elements {
            match element {
                JoinElement::Tree(tree) => required.push(self.compile_tree(query, tree)?),
                JoinElement::Union(union) => required.push(self.compile_nested_union(query, union)?),
                JoinElement::Optional(union) => optionals.push(self.compile_nested_union(query, union)?),
            }
        }

        let mut required = required.into_iter();
        let mut plan = required.next().ok_or(PlanningError::NoRequiredPattern)?;
        for node in required {
            plan = self.join_node(plan, node);
        }
        for node in optionals {
            plan = self.optional_node(plan, node);
        }
        Ok(plan)
    }

    fn compile_tree(&self, query: &Arc<Query>, tree: &Tree) -> PlanningResult<PlanNode> {
        match tree {
            Tree::Leaf(LeafSource::Service(service)) => {
                if service.triples.is_empty() {
                    return Err(PlanningError::EmptyService(service.endpoint.clone()));
                }
                Ok(PlanNode::Leaf(LeafOperator::new(
                    Arc::clone(query),
                    service.clone(),
                    Arc::clone(&self.contactor),
                    self.buffer_size,
                )))
            }
            Tree::Leaf(LeafSource::Union(union)) => self.compile_nested_union(query, union),
            Tree::Node { left, right } => {
                let left = self.compile_tree(query, left)?;
                let right = self.compile_tree(query, right)?;
                Ok(self.join_node(left, right))
            }
        }
    }

    fn union_node(&self, distinct: bool, left: PlanNode, right: PlanNode) -> PlanNode {
        let (lv, rv) = (left.vars().clone(), right.vars().clone());
        let operator: Arc<dyn OperatorStrategy> = if self.adaptive {
            Arc::new(AdaptiveUnion::new(lv, rv, distinct))
        } else {
            Arc::new(Union::new(lv, rv, distinct))
        };
        PlanNode::binary(operator, left, right)
    }

    fn join_node(&self, left: PlanNode, right: PlanNode) -> PlanNode {
        let shared: VarSet = left.vars().intersection(right.vars()).cloned().collect();
        let operator: Arc<dyn OperatorStrategy> = if !self.adaptive {
            Arc::new(HashJoin::new(shared))
        } else if prefers_nested_join(&left, &right, &shared) {
            Arc::new(NestedIndexedJoin::new(shared))
        } else {
            Arc::new(AdaptiveJoin::new(shared))
        };
        debug!("Chose {:?} to join {:?} with {:?}", operator, left.vars(), right.vars());
        PlanNode::binary(operator, left, right)
    }

    fn optional_node(&self, left: PlanNode, right: PlanNode) -> PlanNode {
        let shared: VarSet = left.vars().intersection(right.vars()).cloned().collect();
        let rv = right.vars().clone();
        let operator: Arc<dyn OperatorStrategy> = if self.adaptive {
            Arc::new(AdaptiveOptional::new(shared, rv))
        } else {
            Arc::new(HashOptional::new(shared, rv))
        };
        PlanNode::binary(operator, left, right)
    }
}

/// Compile `query` into a physical plan
pub fn compile(
    query: &Query,
    adaptive: bool,
    buffer_size: usize,
    contactor: Arc<dyn SourceContactor>,
) -> PlanningResult<Option<PlanNode>> {
    PlanCompiler::new(adaptive, buffer_size, contactor).compile(query)
}
