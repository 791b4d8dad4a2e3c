// Query Result Implementation
//
// This module defines the result types for query execution.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::common::{Row, VarSet};
use crate::config::ConfigError;
use crate::query::executor::error::ExecError;
use crate::query::planner::PlanningError;

/// Error type for query operations
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Query resultset representation
#[derive(Debug, Clone, Default)]
pub struct QueryResultSet {
    /// Variable names, in display order
    vars: Vec<String>,
    /// Answers in arrival order
    rows: Vec<Row>,
}

impl QueryResultSet {
    /// Create a new empty resultset over the given variables
    pub fn new(vars: &VarSet) -> Self {
        QueryResultSet {
            vars: vars.iter().cloned().collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row to the resultset
    pub fn add_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Format the resultset as a string table
    pub fn to_string_table(&self) -> String {
        if self.vars.is_empty() {
            return "Empty result".to_string();
        }

        let mut result = String::new();

        result.push_str("| ");
        for var in &self.vars {
            result.push_str(&format!("?{} | ", var));
        }
        result.push('\n');

        result.push('|');
        for var in &self.vars {
            result.push_str(&format!("{}|", "-".repeat(var.len() + 3)));
        }
        result.push('\n');

        for row in &self.rows {
            result.push_str("| ");
            for var in &self.vars {
                match row.get(var) {
                    Some(value) => result.push_str(&format!("{} | ", value)),
                    None => result.push_str("UNBOUND | "),
                }
            }
            result.push('\n');
        }

        result
    }
}
