//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The submitted refresh cycle itself failed.
    #[error("{0:#}")]
    Refresh(anyhow::Error),

    #[error("refresh scheduler has stopped")]
    Stopped,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
