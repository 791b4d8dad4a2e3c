// Query Processing Module
//
// This module contains the planner, which compiles decomposed queries into
// physical plans, and the executor, which runs them.

pub mod executor;
pub mod planner;

pub use executor::engine::ExecutionEngine;
pub use executor::result::{QueryError, QueryResult};
pub use planner::{PlanCompiler, PlanNode};
