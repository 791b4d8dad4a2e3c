// Common Types
//
// Row bindings, variable sets and the channel message type shared by the
// planner, the sources and the execution engine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Set of query variable names (without the leading `?`).
///
/// Ordered and duplicate-free, so two sets holding the same names are equal
/// and hash identically whatever order they were built in. The planner uses
/// it directly as the join-cardinality cache key.
pub type VarSet = BTreeSet<String>;

/// Build a variable set from anything yielding names
pub fn var_set<I, S>(names: I) -> VarSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// A solution mapping: variable name -> literal value string
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Row {
    values: BTreeMap<String, String>,
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Row { values: BTreeMap::new() }
    }

    /// Create a row from (variable, value) pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Row {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Get the value bound to a variable
    pub fn get(&self, var: &str) -> Option<&str> {
        self.values.get(var).map(String::as_str)
    }

    /// Bind a variable
    pub fn set(&mut self, var: impl Into<String>, value: impl Into<String>) {
        self.values.insert(var.into(), value.into());
    }

    /// Variables bound by this row
    pub fn vars(&self) -> VarSet {
        self.values.keys().cloned().collect()
    }

    pub fn contains(&self, var: &str) -> bool {
        self.values.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (variable, value) pairs in variable order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Values of `vars` in set order, or `None` if any of them is unbound.
    /// Used as the hash key of the join operators.
    pub fn key_for(&self, vars: &VarSet) -> Option<Vec<String>> {
        vars.iter().map(|v| self.values.get(v).cloned()).collect()
    }

    /// Restrict the row to the given variables
    pub fn project(&self, vars: &VarSet) -> Row {
        Row {
            values: self
                .values
                .iter()
                .filter(|(k, _)| vars.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// True when both rows agree on every variable they share
    pub fn is_compatible(&self, other: &Row) -> bool {
        self.values
            .iter()
            .all(|(k, v)| other.values.get(k).is_none_or(|o| o == v))
    }

    /// Union of both bindings; `other` never overrides an existing binding
    pub fn merge(&self, other: &Row) -> Row {
        let mut merged = self.clone();
        for (k, v) in &other.values {
            merged.values.entry(k.clone()).or_insert_with(|| v.clone());
        }
        merged
    }

    /// Bind every variable in `vars` that this row leaves unbound to the
    /// empty literal. Optional operators use it for unmatched left rows.
    pub fn pad(&self, vars: &VarSet) -> Row {
        let mut padded = self.clone();
        for var in vars {
            padded.values.entry(var.clone()).or_default();
        }
        padded
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "?{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// An item travelling on a plan channel.
///
/// Every producer writes zero or more `Row`s (possibly interleaved with
/// `Unmatched` markers) followed by exactly one `Eof`, and nothing after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One solution mapping
    Row(Row),
    /// A correlated leaf found no relevant source; carries the variables it
    /// leaves unbound. Consumers treat it as an empty contribution.
    Unmatched(VarSet),
    /// End of stream
    Eof,
}

impl Message {
    pub fn is_eof(&self) -> bool {
        matches!(self, Message::Eof)
    }
}
