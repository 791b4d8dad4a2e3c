// Query Executor Module
//
// This module is responsible for executing physical plans: it spawns the
// workers of a run, connects them with channels and collects the answers.

pub mod context;
pub mod engine;
pub mod error;
pub mod operators;
pub mod result;

pub use self::context::{install_termination_handler, terminate_all, ExecutionContext, WorkerId};
pub use self::engine::{ExecutionEngine, ExecutionHandle};
pub use self::error::{ExecError, ExecResult};
pub use self::operators::{OperatorStrategy, RightInput};
pub use self::result::{QueryError, QueryResult, QueryResultSet};
