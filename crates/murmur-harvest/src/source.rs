//! The capability set a harvestable feed must provide.
//!
//! One implementation per source family (Reddit-like, Mastodon-like),
//! selected by configuration. The worker in [`crate::worker`] is generic
//! over these traits and never knows which family it is driving.

use async_trait::async_trait;
use murmur_core::Direction;

use crate::error::HarvestError;
use crate::types::NormalizedPost;

/// A raw item as returned by a source API, before normalization.
pub trait HarvestItem: Send + Sync {
    /// The source-native id used for cursor arithmetic and upsert keys.
    fn item_id(&self) -> &str;

    /// Map the raw item to the flat record shape, flattening nested
    /// substructures into delimited strings.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Deserialize`] when required fields are
    /// missing or of the wrong shape; the worker skips such items.
    fn normalize(&self, source_key: &str) -> Result<NormalizedPost, HarvestError>;
}

/// A paginated feed that can be harvested in either direction.
#[async_trait]
pub trait FeedSource: Send + Sync {
    type Item: HarvestItem;

    /// Stable cursor key for this feed.
    fn source_key(&self) -> &str;

    /// Whether harvested item ids should also feed the comment backlog.
    fn wants_comments(&self) -> bool {
        false
    }

    /// Fetch the single most recent item, used to seed a missing cursor.
    async fn fetch_latest(&self) -> Result<Option<Self::Item>, HarvestError>;

    /// Fetch one page anchored at `anchor`, exclusive, in `direction`.
    ///
    /// Items must be returned in fetch order such that the **last** item is
    /// the new cursor boundary: nearest-to-anchor last when walking older,
    /// farthest-from-anchor last when walking newer.
    async fn fetch_page(
        &self,
        anchor: &str,
        limit: u32,
        direction: Direction,
    ) -> Result<Vec<Self::Item>, HarvestError>;
}

/// A source that exposes per-item comment threads (Reddit-like).
#[async_trait]
pub trait CommentSource: Send + Sync {
    type Item: HarvestItem;

    fn source_key(&self) -> &str;

    /// Fetch the full comment listing for one post.
    async fn fetch_comments(&self, post_id: &str) -> Result<Vec<Self::Item>, HarvestError>;
}
