use thiserror::Error;

/// Errors from the annotation worker and its scorers.
#[derive(Debug, Error)]
pub enum SentimentError {
    /// The remote scoring service failed or answered with nonsense.
    #[error("scoring service error: {0}")]
    Scoring(String),

    /// Document store unavailable.
    #[error(transparent)]
    Store(#[from] murmur_db::DbError),
}
