//! Feed harvesting: source clients, normalization, and the stateless
//! cursor-driven workers that keep the work queue fed.

pub mod error;
pub mod mastodon;
pub mod normalize;
pub mod reddit;
pub mod retry;
pub mod source;
pub mod types;
pub mod worker;

pub use error::HarvestError;
pub use mastodon::{MastodonSource, MastodonStatus};
pub use reddit::{RedditCredentials, RedditItem, RedditSource};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use source::{CommentSource, FeedSource, HarvestItem};
pub use types::{CommentReport, NormalizedPost, TickReport, TickStatus};
pub use worker::{comment_tick, harvest_tick, HarvestParams};
