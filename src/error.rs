use thiserror::Error;

/// Errors that can occur within the `orderpool` pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool has already been started")]
  AlreadyStarted,

  #[error("Pool has not been started")]
  NotStarted,

  #[error("Pool is shutting down or already shut down, cannot accept new work")]
  ShuttingDown,

  #[error("Pool's internal work channel was closed unexpectedly")]
  WorkChannelClosed,

  #[error("A barrier requires at least one ordering resource")]
  EmptyBarrier,
}
