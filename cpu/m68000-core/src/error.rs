use thiserror::Error;

/// Host-visible failure domain: component protocol violations. In-model
/// exceptions (bus error, trap, ...) never surface here; they are recorded
/// in the exception manager and recovered by the exception unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type CpuResult<T> = Result<T, CpuError>;
