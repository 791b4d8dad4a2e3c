// Join Operators
//
// Inner joins over the variables shared by both inputs. Two rows join when
// they agree on every variable they both bind; the answer binds the union
// of their variables.

pub use self::adaptive::AdaptiveJoin;
pub use self::hash_join::HashJoin;
pub use self::nested_indexed::NestedIndexedJoin;
pub use self::nested_loop::NestedLoopJoin;

mod adaptive;
mod hash_join;
mod nested_indexed;
mod nested_loop;

use std::collections::HashMap;

use crate::common::{Row, VarSet};

/// Rows indexed by their values for the join variables.
///
/// Rows leaving a join variable unbound cannot be indexed and are kept
/// aside; they are checked against every probe. Rows are numbered in
/// insertion order.
#[derive(Debug, Default)]
pub(crate) struct JoinTable {
    vars: VarSet,
    rows: Vec<Row>,
    keyed: HashMap<Vec<String>, Vec<usize>>,
    loose: Vec<usize>,
}

impl JoinTable {
    pub(crate) fn new(vars: VarSet) -> Self {
        JoinTable { vars, rows: Vec::new(), keyed: HashMap::new(), loose: Vec::new() }
    }

    /// Store a row and return its number
    pub(crate) fn insert(&mut self, row: Row) -> usize {
        let index = self.rows.len();
        match row.key_for(&self.vars) {
            Some(key) => self.keyed.entry(key).or_default().push(index),
            None => self.loose.push(index),
        }
        self.rows.push(row);
        index
    }

    /// Numbers of the stored rows compatible with `probe`
    pub(crate) fn matching(&self, probe: &Row) -> Vec<usize> {
        let mut found: Vec<usize> = match probe.key_for(&self.vars) {
            Some(key) => self.keyed.get(&key).into_iter().flatten().chain(&self.loose).copied().collect(),
            None => (0..self.rows.len()).collect(),
        };
        found.retain(|&i| self.rows[i].is_compatible(probe));
        found.sort_unstable();
        found
    }

    /// Stored rows compatible with `probe`, in insertion order
    pub(crate) fn matches<'a>(&'a self, probe: &Row) -> impl Iterator<Item = &'a Row> + use<'a> {
        self.matching(probe).into_iter().map(move |i| &self.rows[i])
    }

    pub(crate) fn rows(&self) -> &[Row] {
        &self.rows
    }
}
