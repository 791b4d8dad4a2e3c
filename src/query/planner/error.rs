use thiserror::Error;

/// Errors raised while compiling a logical tree into a physical plan.
/// They are fatal: no part of the query is executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Join block has no required pattern, only OPTIONAL groups")]
    NoRequiredPattern,

    #[error("Service {0} has no triple patterns")]
    EmptyService(String),

    #[error("Nested UNION has no alternatives")]
    EmptyUnion,
}

pub type PlanningResult<T> = Result<T, PlanningError>;
