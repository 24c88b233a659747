use thiserror::Error;

/// Errors from the queue-draining and routing workers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Queue or document store unavailable.
    #[error(transparent)]
    Store(#[from] murmur_db::DbError),
}
