// Adaptive Federated Query Engine

pub mod catalog;
pub mod common;
pub mod config;
pub mod logical;
pub mod query;
pub mod source;

// Re-export key items for convenient access
pub use catalog::{Catalog, EndpointCatalog};
pub use common::{Message, Row, VarSet};
pub use config::FederationConfig;
pub use logical::Query;
pub use query::executor::engine::{ExecutionEngine, ExecutionHandle};
pub use query::executor::result::{QueryError, QueryResult, QueryResultSet};
pub use query::planner::{compile, PlanCompiler, PlanNode};
pub use source::SourceContactor;
