// Service Leaves
//
// A service is the part of a decomposed query routed to one remote endpoint:
// a list of triple patterns plus optional filter expressions. It knows how to
// render itself as a SPARQL subquery and as a COUNT probe.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{Row, VarSet};
use crate::logical::Query;

/// One position of a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Query variable, stored without the leading `?`
    Variable(String),
    /// Constant already in SPARQL syntax (`<iri>`, `"literal"`, `prefix:name`)
    Constant(String),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Variable(name.into())
    }

    pub fn constant(text: impl Into<String>) -> Self {
        Term::Constant(text.into())
    }

    /// Turn a bound value coming back from a source into a constant term.
    /// Bare IRIs are wrapped in angle brackets and values already written as
    /// terms are kept verbatim. Anything else becomes a plain string literal.
    pub fn from_value(value: &str) -> Self {
        if is_iri(value) {
            Term::Constant(format!("<{}>", value))
        } else if is_written_term(value) {
            Term::Constant(value.to_string())
        } else {
            Term::Constant(quote_literal(value))
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Term::Variable(v) => Some(v),
            Term::Constant(_) => None,
        }
    }

    fn instantiate(&self, bindings: &Row) -> Term {
        match self {
            Term::Variable(v) => match bindings.get(v) {
                Some(value) => Term::from_value(value),
                None => self.clone(),
            },
            Term::Constant(_) => self.clone(),
        }
    }
}

/// Row values holding a bare IRI
pub fn is_iri(value: &str) -> bool {
    ["http://", "https://", "urn:", "file:"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Row values already in SPARQL syntax: `<iri>`, `"literal"` with an optional
/// language tag or datatype, or a `_:` blank node
pub fn is_written_term(value: &str) -> bool {
    (value.starts_with('<') && value.ends_with('>')) || value.starts_with('"') || value.starts_with("_:")
}

/// A value that `Term::from_value` would not read back as a plain literal
pub fn needs_quoting(value: &str) -> bool {
    is_iri(value) || is_written_term(value)
}

/// `value` as a quoted SPARQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(v) => write!(f, "?{}", v),
            Term::Constant(c) => write!(f, "{}", c),
        }
    }
}

/// A triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// Set by the decomposer for patterns expected to match a very large
    /// number of triples (e.g. `?s rdf:type ?o`).
    #[serde(default)]
    pub low_selectivity: bool,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Triple { subject, predicate, object, low_selectivity: false }
    }

    pub fn with_low_selectivity(mut self, low: bool) -> Self {
        self.low_selectivity = low;
        self
    }

    fn terms(&self) -> [&Term; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Variables used by the pattern
    pub fn vars(&self) -> VarSet {
        self.terms()
            .iter()
            .filter_map(|t| t.variable_name().map(str::to_string))
            .collect()
    }

    /// Number of constant positions
    pub fn constant_number(&self) -> usize {
        self.terms().iter().filter(|t| !t.is_variable()).count()
    }

    fn instantiate(&self, bindings: &Row) -> Triple {
        Triple {
            subject: self.subject.instantiate(bindings),
            predicate: self.predicate.instantiate(bindings),
            object: self.object.instantiate(bindings),
            low_selectivity: self.low_selectivity,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// A group of triple patterns answered by one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Endpoint URL
    pub endpoint: String,
    pub triples: Vec<Triple>,
    /// Filter expressions, already in SPARQL syntax
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Service {
    pub fn new(endpoint: impl Into<String>, triples: Vec<Triple>) -> Self {
        Service { endpoint: endpoint.into(), triples, filters: Vec::new() }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// Variables projected by the subquery
    pub fn vars(&self) -> VarSet {
        self.triples.iter().flat_map(Triple::vars).collect()
    }

    /// Number of triple positions
    pub fn places(&self) -> usize {
        self.triples.len() * 3
    }

    /// Number of constant triple positions
    pub fn constant_number(&self) -> usize {
        self.triples.iter().map(Triple::constant_number).sum()
    }

    pub fn all_triples_low_selectivity(&self) -> bool {
        self.triples.iter().all(|t| t.low_selectivity)
    }

    /// Substitute bound values for variables, producing a new service
    pub fn instantiate(&self, bindings: &Row) -> Service {
        Service {
            endpoint: self.endpoint.clone(),
            triples: self.triples.iter().map(|t| t.instantiate(bindings)).collect(),
            filters: self.filters.clone(),
        }
    }

    fn pattern(&self) -> String {
        let mut body = self
            .triples
            .iter()
            .map(|t| format!("{} .", t))
            .collect::<Vec<_>>()
            .join(" ");
        for filter in &self.filters {
            body.push_str(&format!(" FILTER ({})", filter));
        }
        body
    }

    fn select(&self, distinct: bool, vars: &VarSet) -> String {
        let projection = if vars.is_empty() {
            "*".to_string()
        } else {
            vars.iter().map(|v| format!("?{}", v)).collect::<Vec<_>>().join(" ")
        };
        let modifier = if distinct { "DISTINCT " } else { "" };
        format!("SELECT {}{} WHERE {{ {} }}", modifier, projection, self.pattern())
    }

    /// Endpoint, subquery text and projected variables of this leaf
    pub fn info_io(&self, query: &Query) -> (String, String, VarSet) {
        let vars = self.vars();
        let text = format!("{}{}", query.prologue(), self.select(query.distinct, &vars));
        (self.endpoint.clone(), text, vars)
    }

    /// Endpoint and COUNT probe text. With an empty `vars` the probe counts
    /// all answers of the subquery; otherwise it counts the distinct
    /// combinations of `vars`.
    pub fn count_query(&self, query: &Query, vars: &VarSet) -> (String, String) {
        let inner = if vars.is_empty() {
            self.select(query.distinct, &self.vars())
        } else {
            self.select(true, vars)
        };
        let text = format!("{}SELECT (COUNT(*) AS ?cnt) WHERE {{ {} }}", query.prologue(), inner);
        (self.endpoint.clone(), text)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SERVICE <{}> {{ {} }}", self.endpoint, self.pattern())
    }
}
