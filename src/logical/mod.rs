// Logical Query Tree
//
// The decomposed query handed over by the parser/decomposer: a union of join
// blocks whose elements are trees of service leaves, optional groups and
// nested unions. The planner turns it into a physical plan.

pub mod service;
pub mod template;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::service::{Service, Term, Triple};

/// A decomposed query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// `(prefix, iri)` declarations emitted in front of every subquery
    #[serde(default)]
    pub prefixes: Vec<(String, String)>,
    /// Whether duplicate answers collapse
    #[serde(default)]
    pub distinct: bool,
    pub body: UnionBlock,
}

impl Query {
    pub fn new(body: UnionBlock) -> Self {
        Query { prefixes: Vec::new(), distinct: false, body }
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.prefixes.push((prefix.into(), iri.into()));
        self
    }

    /// Every endpoint some service of the query is sent to
    pub fn endpoints(&self) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        self.body.collect_endpoints(&mut found);
        found
    }

    /// PREFIX lines shared by all generated subqueries
    pub fn prologue(&self) -> String {
        self.prefixes
            .iter()
            .map(|(p, iri)| format!("PREFIX {}: <{}>\n", p, iri))
            .collect()
    }
}

/// Alternatives whose answers are unioned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnionBlock {
    pub join_blocks: Vec<JoinBlock>,
}

impl UnionBlock {
    pub fn new(join_blocks: Vec<JoinBlock>) -> Self {
        UnionBlock { join_blocks }
    }

    fn collect_endpoints(&self, found: &mut BTreeSet<String>) {
        for block in &self.join_blocks {
            for element in &block.elements {
                match element {
                    JoinElement::Tree(tree) => tree.collect_endpoints(found),
                    JoinElement::Optional(union) | JoinElement::Union(union) => union.collect_endpoints(found),
                }
            }
        }
    }
}

/// Elements whose answers are joined
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinBlock {
    pub elements: Vec<JoinElement>,
}

impl JoinBlock {
    pub fn new(elements: Vec<JoinElement>) -> Self {
        JoinBlock { elements }
    }

    /// A join block made of a single tree
    pub fn single(tree: Tree) -> Self {
        JoinBlock { elements: vec![JoinElement::Tree(tree)] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinElement {
    /// A tree of service leaves
    Tree(Tree),
    /// An OPTIONAL group, left-joined onto the rest of the block
    Optional(UnionBlock),
    /// A nested UNION
    Union(UnionBlock),
}

/// Binary decomposition tree produced by the decomposer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Tree {
    Leaf(LeafSource),
    Node { left: Box<Tree>, right: Box<Tree> },
}

impl Tree {
    pub fn service(service: Service) -> Self {
        Tree::Leaf(LeafSource::Service(service))
    }

    pub fn node(left: Tree, right: Tree) -> Self {
        Tree::Node { left: Box::new(left), right: Box::new(right) }
    }

    fn collect_endpoints(&self, found: &mut BTreeSet<String>) {
        match self {
            Tree::Leaf(LeafSource::Service(service)) => {
                found.insert(service.endpoint.clone());
            }
            Tree::Leaf(LeafSource::Union(union)) => union.collect_endpoints(found),
            Tree::Node { left, right } => {
                left.collect_endpoints(found);
                right.collect_endpoints(found);
            }
        }
    }
}

/// What a leaf stands for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LeafSource {
    Service(Service),
    Union(UnionBlock),
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tree::Leaf(LeafSource::Service(s)) => write!(f, "{}", s),
            Tree::Leaf(LeafSource::Union(u)) => write!(f, "UNION[{} blocks]", u.join_blocks.len()),
            Tree::Node { left, right } => write!(f, "({} . {})", left, right),
        }
    }
}
