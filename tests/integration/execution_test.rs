use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;

use anyhow::Result;

use fedquery::catalog::{Catalog, EndpointCatalog};
use fedquery::common::{var_set, Message, Row};
use fedquery::config::FederationConfig;
use fedquery::query::executor::engine::ExecutionEngine;
use fedquery::logical::{JoinBlock, JoinElement, Query, Tree, UnionBlock};
use fedquery::query::executor::operators::NestedIndexedJoin;
use fedquery::query::planner::{CorrelatedLeafOperator, PlanNode};
use fedquery::source::memory::is_count_query;
use fedquery::source::{InMemoryContactor, SourceContactor, SourceResult};

#[path = "../common/mod.rs"]
mod common;

use common::{block_query, compile, engine, iri, rows, run_plan, tree, tree_query, triple, union_query, values};

const NAME: &str = "<http://example.org/name>";
const TARGET: &str = "<http://example.org/target>";
const LABEL: &str = "<http://example.org/label>";

fn named(endpoint: &str, var: &str) -> Tree {
    tree(endpoint, vec![triple("?x", NAME, &format!("?{}", var))])
}

fn person(id: &str, var: &str, value: &str) -> Row {
    Row::from_pairs([("x".to_string(), iri(id)), (var.to_string(), value.to_string())])
}

#[test]
fn test_union_relays_every_answer_once() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("a", vec![person("1", "n", "ann"), person("2", "n", "bob")])
            .with_rows("b", vec![person("3", "n", "cid"), person("4", "n", "dee"), person("5", "n", "eve")]),
    );
    let query = union_query(vec![named("a", "n"), named("b", "n")], false);

    for adaptive in [true, false] {
        let plan = compile(&contactor, &query, adaptive)?;
        let messages = run_plan(&contactor, plan)?;
        let answers = rows(&messages);
        assert_eq!(answers.len(), 5);
        assert_eq!(messages.iter().filter(|m| m.is_eof()).count(), 1);

        // Each source's answers keep their relative order
        let names = values(&answers, "n");
        let a: Vec<&String> = names.iter().filter(|n| ["ann", "bob"].contains(&n.as_str())).collect();
        assert_eq!(a, vec!["ann", "bob"]);
    }
    Ok(())
}

#[test]
fn test_distinct_union_drops_duplicates() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("a", vec![person("1", "n", "ann")])
            .with_rows("b", vec![person("1", "n", "ann"), person("2", "n", "bob")])
            .with_rows("c", vec![person("2", "n", "bob")]),
    );
    let trees = vec![named("a", "n"), named("b", "n"), named("c", "n")];

    let distinct = engine(&contactor, true).run(&union_query(trees.clone(), true))?;
    assert_eq!(distinct.row_count(), 2);

    let all = engine(&contactor, true).run(&union_query(trees, false))?;
    assert_eq!(all.row_count(), 4);
    Ok(())
}

#[test]
fn test_union_pads_variables_of_the_other_side() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("a", vec![person("1", "n", "ann")])
            .with_rows("b", vec![person("2", "m", "bob@example.org")]),
    );
    let plan = compile(&contactor, &union_query(vec![named("a", "n"), named("b", "m")], false), true)?;
    let vars = plan.vars().clone();
    let answers = rows(&run_plan(&contactor, plan)?);

    assert_eq!(answers.len(), 2);
    for row in &answers {
        assert_eq!(row.vars(), vars);
    }
    let ann = answers.iter().find(|r| r.get("n") == Some("ann")).expect("ann");
    assert_eq!(ann.get("m"), Some(""));
    Ok(())
}

fn drug_contactor() -> InMemoryContactor {
    InMemoryContactor::new()
        .with_rows(
            "drugs",
            vec![
                Row::from_pairs([("x", iri("aspirin"))]),
                Row::from_pairs([("x", iri("ibuprofen"))]),
                Row::from_pairs([("x", iri("aspirin"))]),
            ],
        )
        .with_rows(
            "labels",
            vec![
                Row::from_pairs([("x", iri("aspirin")), ("label", "Aspirin".to_string())]),
                Row::from_pairs([("x", iri("aspirin")), ("label", "ASA".to_string())]),
                Row::from_pairs([("x", iri("ibuprofen")), ("label", "Ibuprofen".to_string())]),
                Row::from_pairs([("x", iri("paracetamol")), ("label", "Paracetamol".to_string())]),
            ],
        )
}

fn drug_query() -> Query {
    tree_query(Tree::node(
        tree("drugs", vec![triple("?x", TARGET, "<http://example.org/cox>")]),
        tree("labels", vec![triple("?x", LABEL, "?label")]),
    ))
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}

#[test]
fn test_join_strategies_agree() -> Result<()> {
    let contactor = Arc::new(drug_contactor().with_count("drugs", 3).with_count("labels", 1000));

    let nested = compile(&contactor, &drug_query(), true)?;
    assert_eq!(common::root_operator(&nested), "NestedIndexedJoin");
    let nested = sorted(rows(&run_plan(&contactor, nested)?));

    let hash = sorted(rows(&run_plan(&contactor, compile(&contactor, &drug_query(), false)?)?));

    let slow = Arc::new(drug_contactor().with_count("drugs", 3).with_count("labels", 5));
    let adaptive = compile(&slow, &drug_query(), true)?;
    assert_eq!(common::root_operator(&adaptive), "AdaptiveJoin");
    let adaptive = sorted(rows(&run_plan(&slow, adaptive)?));

    // aspirin appears twice on the left and has two labels
    assert_eq!(hash.len(), 5);
    assert_eq!(nested, hash);
    assert_eq!(adaptive, hash);
    for row in &hash {
        assert_eq!(row.vars(), var_set(["x", "label"]));
    }
    Ok(())
}

#[test]
fn test_nested_join_probes_each_key_once() -> Result<()> {
    let contactor = Arc::new(drug_contactor().with_count("drugs", 3).with_count("labels", 1000));
    let plan = compile(&contactor, &drug_query(), true)?;
    let answers = rows(&run_plan(&contactor, plan)?);

    assert_eq!(answers.len(), 5);
    // Two distinct drugs, so two instantiated subqueries
    assert_eq!(contactor.request_count("labels"), 2);
    let probes: Vec<String> = contactor
        .requests()
        .into_iter()
        .filter(|(e, q)| e == "labels" && !is_count_query(q))
        .map(|(_, q)| q)
        .collect();
    assert!(probes.iter().any(|q| q.contains("<http://example.org/aspirin>")));
    assert!(probes.iter().any(|q| q.contains("<http://example.org/ibuprofen>")));
    Ok(())
}

// Tracks how many requests to one endpoint are running at once
struct GaugedContactor {
    inner: InMemoryContactor,
    endpoint: &'static str,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SourceContactor for GaugedContactor {
    fn fetch(&self, endpoint: &str, query: &str, out: &Sender<Message>, buffer_size: usize) -> SourceResult<Option<bool>> {
        if endpoint != self.endpoint {
            return self.inner.fetch(endpoint, query, out, buffer_size);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        let answer = self.inner.fetch(endpoint, query, out, buffer_size);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

#[test]
fn test_nested_join_limits_subqueries_in_flight() -> Result<()> {
    let ids: Vec<String> = (0..6).map(|i| format!("drug{}", i)).collect();
    let contactor = Arc::new(GaugedContactor {
        inner: InMemoryContactor::new()
            .with_rows("drugs", ids.iter().map(|id| Row::from_pairs([("x", iri(id))])).collect())
            .with_rows(
                "labels",
                ids.iter().map(|id| Row::from_pairs([("x", iri(id)), ("label", id.to_uppercase())])).collect(),
            ),
        endpoint: "labels",
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let sources: Arc<dyn SourceContactor> = contactor.clone();
    let engine = ExecutionEngine::new(FederationConfig::default(), sources);

    let left = engine.compile(&tree_query(tree("drugs", vec![triple("?x", TARGET, "<http://example.org/cox>")])))?;
    let right = engine.compile(&tree_query(tree("labels", vec![triple("?x", LABEL, "?label")])))?;
    let (Some(left), Some(right)) = (left, right) else {
        panic!("expected two leaves");
    };
    let plan = PlanNode::binary(
        Arc::new(NestedIndexedJoin::new(var_set(["x"])).with_max_probes(2)),
        left,
        right,
    );

    let results = engine.execute(plan)?.collect()?;
    assert_eq!(results.row_count(), 6);
    assert!(contactor.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(contactor.inner.request_count("labels"), 6);
    Ok(())
}

#[test]
fn test_join_strategies_agree_on_tagged_literals() -> Result<()> {
    let english = "\"Aspirin\"@en";
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("names", vec![Row::from_pairs([("x".to_string(), iri("n1")), ("name".to_string(), english.to_string())])])
            .with_rows(
                "labels",
                vec![
                    Row::from_pairs([("drug".to_string(), iri("aspirin")), ("name".to_string(), english.to_string())]),
                    Row::from_pairs([("drug".to_string(), iri("plain")), ("name".to_string(), "Aspirin".to_string())]),
                ],
            )
            .with_count("names", 1)
            .with_count("labels", 1000),
    );
    let query = tree_query(Tree::node(
        tree("names", vec![triple("?x", TARGET, "<http://example.org/cox>"), triple("?x", NAME, "?name")]),
        tree("labels", vec![triple("?drug", LABEL, "?name")]),
    ));

    let nested = compile(&contactor, &query, true)?;
    assert_eq!(common::root_operator(&nested), "NestedIndexedJoin");
    let nested = rows(&run_plan(&contactor, nested)?);
    let hash = rows(&run_plan(&contactor, compile(&contactor, &query, false)?)?);

    assert_eq!(nested, hash);
    assert_eq!(values(&hash, "drug"), vec![iri("aspirin")]);
    Ok(())
}

#[test]
fn test_optional_pads_unmatched_rows() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("people", vec![person("alice", "n", "alice"), person("bob", "n", "bob")])
            .with_rows("mail", vec![person("alice", "mail", "alice@example.org")]),
    );
    let query = block_query(vec![
        JoinElement::Tree(named("people", "n")),
        JoinElement::Optional(UnionBlock::new(vec![JoinBlock::single(named("mail", "mail"))])),
    ]);

    for adaptive in [true, false] {
        let results = engine(&contactor, adaptive).run(&query)?;
        assert_eq!(results.row_count(), 2);
        let bob = results.rows().iter().find(|r| r.get("n") == Some("bob")).expect("bob");
        assert_eq!(bob.get("mail"), Some(""));
        let alice = results.rows().iter().find(|r| r.get("n") == Some("alice")).expect("alice");
        assert_eq!(alice.get("mail"), Some("alice@example.org"));
    }
    Ok(())
}

#[test]
fn test_failing_source_contributes_nothing() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("a", vec![person("1", "n", "ann")])
            .with_rows("b", vec![person("2", "n", "bob")])
            .with_failure("b"),
    );
    let results = engine(&contactor, true).run(&union_query(vec![named("a", "n"), named("b", "n")], false))?;
    assert_eq!(results.row_count(), 1);
    assert_eq!(results.rows()[0].get("n"), Some("ann"));
    Ok(())
}

#[test]
fn test_adaptive_union_forwards_fast_source_first() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows("slow", vec![person("1", "n", "slow")])
            .with_delay("slow", Duration::from_millis(300))
            .with_rows("fast", vec![person("2", "n", "fast")]),
    );
    let plan = compile(&contactor, &union_query(vec![named("slow", "n"), named("fast", "n")], false), true)?;
    let answers = rows(&run_plan(&contactor, plan)?);
    assert_eq!(values(&answers, "n"), vec!["fast", "slow"]);
    Ok(())
}

fn dbpedia(name: &str) -> String {
    format!("http://dbpedia.org/resource/{}", name)
}

#[test]
fn test_correlated_leaf_dereferences_instances() -> Result<()> {
    let contactor = Arc::new(
        InMemoryContactor::new()
            .with_rows(
                "drugs",
                vec![
                    Row::from_pairs([("drug", dbpedia("Aspirin"))]),
                    Row::from_pairs([("drug", "http://other.org/resource/Unknown".to_string())]),
                ],
            )
            .with_rows(
                "dbpedia",
                vec![
                    Row::from_pairs([("drug", dbpedia("Aspirin")), ("label", "Aspirin".to_string())]),
                    Row::from_pairs([("drug", dbpedia("Ibuprofen")), ("label", "Ibuprofen".to_string())]),
                ],
            ),
    );
    let mut catalog = Catalog::new();
    catalog.register("dbpedia", ["http://dbpedia.org"]);
    let catalog: Arc<dyn EndpointCatalog> = Arc::new(catalog);
    let sources: Arc<dyn SourceContactor> = contactor.clone();

    let left = compile(&contactor, &tree_query(tree("drugs", vec![triple("?drug", TARGET, "?t")])), true)?;
    assert!(matches!(left, PlanNode::Leaf(_)));
    let correlated = CorrelatedLeafOperator::new(
        "SELECT ?drug ?label WHERE { ?drug <http://www.w3.org/2000/01/rdf-schema#label> ?label }",
        var_set(["drug", "label"]),
        vec!["dbpedia".to_string()],
        catalog,
        sources,
        1024,
    );
    let plan = PlanNode::binary(
        Arc::new(NestedIndexedJoin::new(var_set(["drug"]))),
        left,
        PlanNode::Correlated(correlated),
    );

    let answers = rows(&run_plan(&contactor, plan)?);
    assert_eq!(answers, vec![Row::from_pairs([("drug", dbpedia("Aspirin")), ("label", "Aspirin".to_string())])]);
    // The unknown instance has no relevant endpoint and is never sent anywhere
    assert_eq!(contactor.request_count("dbpedia"), 1);
    Ok(())
}

#[test]
fn test_correlated_leaf_without_relevant_endpoint() -> Result<()> {
    let contactor = Arc::new(InMemoryContactor::new());
    let sources: Arc<dyn SourceContactor> = contactor.clone();
    let correlated = CorrelatedLeafOperator::new(
        "SELECT ?drug ?label WHERE { ?drug <http://www.w3.org/2000/01/rdf-schema#label> ?label }",
        var_set(["drug", "label"]),
        vec!["dbpedia".to_string()],
        Arc::new(Catalog::new()),
        sources,
        1024,
    );
    let bound = PlanNode::Correlated(correlated).instantiate(&Row::from_pairs([("drug", dbpedia("Aspirin"))]));

    let messages = run_plan(&contactor, bound)?;
    assert_eq!(messages, vec![Message::Unmatched(var_set(["label"])), Message::Eof]);
    assert!(contactor.requests().is_empty());
    Ok(())
}

#[test]
fn test_run_without_join_blocks_is_empty() -> Result<()> {
    let contactor = Arc::new(InMemoryContactor::new());
    let results = engine(&contactor, true).run(&Query::default())?;
    assert_eq!(results.row_count(), 0);
    Ok(())
}
