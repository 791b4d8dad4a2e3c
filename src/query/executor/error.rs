use thiserror::Error;

use crate::query::executor::context::WorkerId;

/// Errors raised by the workers of a running plan
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Channel protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Downstream consumer disconnected")]
    Disconnected,

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker {0} panicked")]
    WorkerPanicked(WorkerId),
}

pub type ExecResult<T> = Result<T, ExecError>;
