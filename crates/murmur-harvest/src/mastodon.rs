//! Mastodon-like source client (public local timeline, no auth).
//!
//! The public timeline API returns newest-first pages anchored by `max_id`
//! (walking older) or `min_id` (walking newer). Statuses carry HTML content,
//! which normalization reduces to plain text.

use async_trait::async_trait;
use serde::Deserialize;

use murmur_core::Direction;

use crate::error::HarvestError;
use crate::normalize::strip_html;
use crate::source::{FeedSource, HarvestItem};
use crate::types::NormalizedPost;

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonAccount {
    #[serde(default)]
    pub acct: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonTag {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonAttachment {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One status from the public timeline.
#[derive(Debug, Clone, Deserialize)]
pub struct MastodonStatus {
    pub id: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub content: String,
    pub account: Option<MastodonAccount>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub favourites_count: i64,
    #[serde(default)]
    pub reblogs_count: i64,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub tags: Vec<MastodonTag>,
    #[serde(default)]
    pub media_attachments: Vec<MastodonAttachment>,
}

impl HarvestItem for MastodonStatus {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn normalize(&self, source_key: &str) -> Result<NormalizedPost, HarvestError> {
        let text = strip_html(&self.content);
        let mut extra = std::collections::BTreeMap::new();
        let mut put = |key: &str, value: String| {
            if !value.is_empty() {
                extra.insert(key.to_string(), value);
            }
        };

        if let Some(url) = &self.url {
            put("url", url.clone());
        }
        if let Some(visibility) = &self.visibility {
            put("visibility", visibility.clone());
        }
        if let Some(language) = &self.language {
            put("language", language.clone());
        }
        put("favourites_count", self.favourites_count.to_string());
        put("reblogs_count", self.reblogs_count.to_string());
        put("replies_count", self.replies_count.to_string());
        if !self.tags.is_empty() {
            let names: Vec<&str> = self.tags.iter().map(|t| t.name.as_str()).collect();
            put("tags", names.join(" "));
        }
        if !self.media_attachments.is_empty() {
            let flattened: Vec<String> = self
                .media_attachments
                .iter()
                .map(|a| format!("{}|{}", a.id, a.url.as_deref().unwrap_or("")))
                .collect();
            put("media_attachments", flattened.join(";"));
        }

        Ok(NormalizedPost {
            id: self.id.clone(),
            source_key: source_key.to_string(),
            author: self
                .account
                .as_ref()
                .map(|a| a.acct.clone())
                .filter(|a| !a.is_empty()),
            content: (!text.is_empty()).then_some(text),
            created_at: self.created_at,
            extra,
        })
    }
}

/// Client for one Mastodon-compatible server's public local timeline.
pub struct MastodonSource {
    client: reqwest::Client,
    source_key: String,
    user_agent: String,
    base_url: String,
}

impl MastodonSource {
    /// Build a client for `server` (a base URL like `https://mastodon.example`).
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] if the HTTP client cannot be built.
    pub fn new(
        server: &str,
        source_key: &str,
        user_agent: &str,
        timeout_secs: u64,
    ) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarvestError::Config {
                source_key: source_key.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            source_key: source_key.to_string(),
            user_agent: user_agent.to_string(),
            base_url: server.trim_end_matches('/').to_string(),
        })
    }

    async fn get_timeline(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<MastodonStatus>, HarvestError> {
        let url = format!("{}/api/v1/timelines/public", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(HarvestError::RateLimited {
                source_key: self.source_key.clone(),
                retry_after_secs,
            });
        }
        if !status.is_success() {
            return Err(HarvestError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        serde_json::from_slice(&response.bytes().await?).map_err(|e| HarvestError::Deserialize {
            context: format!("{} timeline", self.source_key),
            source: e,
        })
    }
}

#[async_trait]
impl FeedSource for MastodonSource {
    type Item = MastodonStatus;

    fn source_key(&self) -> &str {
        &self.source_key
    }

    async fn fetch_latest(&self) -> Result<Option<MastodonStatus>, HarvestError> {
        let statuses = self
            .get_timeline(&[("local", "true".to_string()), ("limit", "1".to_string())])
            .await?;
        Ok(statuses.into_iter().next())
    }

    async fn fetch_page(
        &self,
        anchor: &str,
        limit: u32,
        direction: Direction,
    ) -> Result<Vec<MastodonStatus>, HarvestError> {
        let anchor_param = match direction {
            Direction::Older => "max_id",
            Direction::Newer => "min_id",
        };
        let mut statuses = self
            .get_timeline(&[
                ("local", "true".to_string()),
                ("limit", limit.to_string()),
                (anchor_param, anchor.to_string()),
            ])
            .await?;

        // Newest-first pages: already boundary-last when walking older,
        // reversed when walking newer.
        if direction == Direction::Newer {
            statuses.reverse();
        }
        Ok(statuses)
    }
}
