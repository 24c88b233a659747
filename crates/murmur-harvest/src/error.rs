use thiserror::Error;

/// Errors surfaced by the harvest workers and source clients.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The remote API asked us to back off (HTTP 429).
    #[error("rate limited by {source_key} (retry after {retry_after_secs:?}s)")]
    RateLimited {
        source_key: String,
        retry_after_secs: Option<u64>,
    },

    /// Network or TLS failure from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a status we do not handle.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The source has no items at all, so no cursor can be seeded.
    /// The caller must retry later; no sentinel cursor is written.
    #[error("source {source_key} returned no items to seed a cursor from")]
    NoData { source_key: String },

    /// Required credentials or configuration are missing for this source.
    #[error("configuration error for {source_key}: {reason}")]
    Config { source_key: String, reason: String },

    /// Every commit attempt within the tick lost the CAS race.
    #[error("cursor commit conflicted {attempts} times for {source_key}; giving up this tick")]
    ConflictExhausted { source_key: String, attempts: u32 },

    /// The cursor advanced but some or all of the batch never reached the
    /// queue. The tick must not be reported as a success; the skipped range
    /// is only recoverable by external replay.
    #[error("cursor committed for {source_key} but only {queued}/{total} items reached the queue")]
    CommitUnqueued {
        source_key: String,
        queued: usize,
        total: usize,
        #[source]
        source: murmur_db::DbError,
    },

    /// Cursor store or queue unavailable.
    #[error(transparent)]
    Store(#[from] murmur_db::DbError),
}
