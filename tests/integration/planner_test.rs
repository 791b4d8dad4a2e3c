use std::sync::Arc;

use anyhow::Result;

use fedquery::common::{var_set, Row, VarSet};
use fedquery::logical::{JoinBlock, JoinElement, Query, Tree, UnionBlock};
use fedquery::query::planner::{PlanNode, PlanningError};
use fedquery::source::InMemoryContactor;
use fedquery::QueryError;

#[path = "../common/mod.rs"]
mod common;

use common::{block_query, compile, engine, root_operator, tree, tree_query, triple, union_query};

const TARGET: &str = "<http://example.org/target>";
const LABEL: &str = "<http://example.org/label>";

// ?x <target> <t1>: two of three positions are constant
fn selective_left() -> Tree {
    tree("left", vec![triple("?x", TARGET, "<http://example.org/t1>")])
}

fn right() -> Tree {
    tree("right", vec![triple("?x", LABEL, "?label")])
}

fn join_query(left: Tree, right: Tree) -> Query {
    tree_query(Tree::node(left, right))
}

fn counts(left: u64, right: u64) -> Arc<InMemoryContactor> {
    Arc::new(InMemoryContactor::new().with_count("left", left).with_count("right", right))
}

#[test]
fn test_nested_join_for_small_selective_left() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    assert_eq!(root_operator(&plan), "NestedIndexedJoin");
    assert_eq!(plan.vars(), &var_set(["x", "label"]));
    Ok(())
}

#[test]
fn test_adaptive_join_when_left_too_large() -> Result<()> {
    let contactor = counts(50, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    assert_eq!(root_operator(&plan), "AdaptiveJoin");
    Ok(())
}

#[test]
fn test_adaptive_join_when_left_not_much_smaller_than_right() -> Result<()> {
    // 10 > 0.3 * 20
    let contactor = counts(10, 20);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    assert_eq!(root_operator(&plan), "AdaptiveJoin");
    Ok(())
}

#[test]
fn test_low_selectivity_right_skips_ratio_check() -> Result<()> {
    let contactor = counts(10, 20);
    let right = tree("right", vec![triple("?x", LABEL, "?label").with_low_selectivity(true)]);
    let plan = compile(&contactor, &join_query(selective_left(), right), true)?;
    assert_eq!(root_operator(&plan), "NestedIndexedJoin");
    // Only the left side was probed
    assert_eq!(contactor.probe_count(), 1);
    Ok(())
}

#[test]
fn test_adaptive_join_without_shared_variables() -> Result<()> {
    let contactor = counts(10, 1000);
    let unrelated = tree("right", vec![triple("?z", LABEL, "?label")]);
    let plan = compile(&contactor, &join_query(selective_left(), unrelated), true)?;
    assert_eq!(root_operator(&plan), "AdaptiveJoin");
    assert_eq!(contactor.probe_count(), 0);
    Ok(())
}

#[test]
fn test_adaptive_join_when_left_has_few_constants() -> Result<()> {
    let contactor = counts(10, 1000);
    let left = tree("left", vec![triple("?x", TARGET, "?t")]);
    let plan = compile(&contactor, &join_query(left, right()), true)?;
    assert_eq!(root_operator(&plan), "AdaptiveJoin");
    Ok(())
}

#[test]
fn test_failed_probe_takes_conservative_branch() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_probe_failure("left")
            .with_count("right", 1000),
    );
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    assert_eq!(root_operator(&plan), "AdaptiveJoin");
    assert_eq!(plan.get_cardinality(), None);
    Ok(())
}

#[test]
fn test_blocking_mode_never_probes() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), false)?;
    assert_eq!(root_operator(&plan), "HashJoin");
    assert_eq!(contactor.probe_count(), 0);
    Ok(())
}

#[test]
fn test_cardinality_is_memoized_across_calls() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    let PlanNode::Binary(node) = &plan else {
        panic!("expected a binary root");
    };
    let probes = contactor.probe_count();

    let first = node.left().get_cardinality();
    let second = node.left().get_cardinality();
    assert_eq!(first, Some(10));
    assert_eq!(first, second);
    assert_eq!(contactor.probe_count(), probes);

    assert_eq!(plan.get_join_cardinality(&VarSet::new()), plan.get_cardinality());
    Ok(())
}

#[test]
fn test_concurrent_estimates_count_once() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &tree_query(right()), true)?;
    assert!(matches!(plan, PlanNode::Leaf(_)));
    let shared = var_set(["x"]);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                plan.get_join_cardinality(&shared);
                plan.get_cardinality();
            });
        }
    });
    // One total probe and one join probe
    assert_eq!(contactor.probe_count(), 2);
    Ok(())
}

#[test]
fn test_instantiate_removes_bound_variables() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    let before = plan.get_cardinality();

    let bound = plan.instantiate(&Row::from_pairs([("x", "http://example.org/drug1")]));
    assert_eq!(bound.vars(), &var_set(["label"]));
    assert_eq!(root_operator(&bound), "NestedIndexedJoin");

    assert_eq!(plan.vars(), &var_set(["x", "label"]));
    assert_eq!(plan.get_cardinality(), before);
    Ok(())
}

#[test]
fn test_unions_fold_left() -> Result<()> {
    let contactor = Arc::new(InMemoryContactor::new());
    let query = union_query(
        vec![
            tree("a", vec![triple("?x", LABEL, "?a")]),
            tree("b", vec![triple("?x", LABEL, "?b")]),
            tree("c", vec![triple("?x", LABEL, "?c")]),
        ],
        false,
    );

    let plan = compile(&contactor, &query, true)?;
    assert_eq!(root_operator(&plan), "AdaptiveUnion");
    assert_eq!(plan.vars(), &var_set(["x", "a", "b", "c"]));
    let PlanNode::Binary(node) = &plan else {
        panic!("expected a binary root");
    };
    // The accumulated union sits on the left
    assert_eq!(root_operator(node.left()), "AdaptiveUnion");
    assert_eq!(root_operator(node.right()), "Leaf");

    let blocking = compile(&contactor, &query, false)?;
    assert_eq!(root_operator(&blocking), "Union");
    Ok(())
}

#[test]
fn test_optional_is_applied_after_required_joins() -> Result<()> {
    let contactor = counts(100, 100);
    let query = block_query(vec![
        JoinElement::Optional(UnionBlock::new(vec![JoinBlock::single(tree(
            "right",
            vec![triple("?x", LABEL, "?label")],
        ))])),
        JoinElement::Tree(tree("left", vec![triple("?x", TARGET, "?t")])),
    ]);

    let plan = compile(&contactor, &query, true)?;
    assert_eq!(root_operator(&plan), "AdaptiveOptional");
    assert_eq!(plan.vars(), &var_set(["x", "t", "label"]));

    let blocking = compile(&contactor, &query, false)?;
    assert_eq!(root_operator(&blocking), "HashOptional");
    Ok(())
}

#[test]
fn test_planning_errors() -> Result<()> {
    let contactor = Arc::new(InMemoryContactor::new());
    let engine = engine(&contactor, true);

    let only_optional = block_query(vec![JoinElement::Optional(UnionBlock::new(vec![
        JoinBlock::single(right()),
    ]))]);
    assert!(matches!(
        engine.compile(&only_optional),
        Err(QueryError::Planning(PlanningError::NoRequiredPattern))
    ));

    let empty_service = tree_query(tree("nowhere", vec![]));
    assert!(matches!(
        engine.compile(&empty_service),
        Err(QueryError::Planning(PlanningError::EmptyService(e))) if e == "nowhere"
    ));

    let empty_union = block_query(vec![JoinElement::Tree(right()), JoinElement::Union(UnionBlock::default())]);
    assert!(matches!(
        engine.compile(&empty_union),
        Err(QueryError::Planning(PlanningError::EmptyUnion))
    ));

    // No join blocks at all is not an error, there is just nothing to run
    assert!(engine.compile(&Query::default())?.is_none());

    // Nothing was executed
    assert!(contactor.requests().is_empty());
    Ok(())
}

#[test]
fn test_explain_lists_every_node() -> Result<()> {
    let contactor = counts(10, 1000);
    let plan = compile(&contactor, &join_query(selective_left(), right()), true)?;
    let text = plan.to_string();
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines[0].starts_with("NestedIndexedJoin {?label, ?x}"));
    assert!(text.contains("Leaf <left> {?x}"));
    assert!(text.contains("Leaf <right> {?label, ?x}"));
    assert!(text.contains("SELECT ?label ?x WHERE"));
    Ok(())
}
