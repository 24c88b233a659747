//! Reddit-like source client (client-credentials OAuth, listing API).
//!
//! Posts are read from `/r/<subreddit>/new`, which returns a single
//! newest-first page anchored by the `after`/`before` fullname parameters.
//! Comment threads are fetched per post id and drained into the comment
//! backlog by [`crate::worker::comment_tick`].

use async_trait::async_trait;
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::{Map, Value};

use murmur_core::Direction;

use crate::error::HarvestError;
use crate::normalize::{
    epoch_to_datetime, flatten_awardings, flatten_flair_richtext, flatten_gildings,
    flatten_media_metadata,
};
use crate::source::{CommentSource, FeedSource, HarvestItem};
use crate::types::NormalizedPost;

const AUTH_BASE_URL: &str = "https://www.reddit.com";
const API_BASE_URL: &str = "https://oauth.reddit.com";
const COMMENT_PAGE_LIMIT: u32 = 500;

/// Credentials for the client-credentials OAuth grant.
#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

/// Reddit OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Reddit listing wrapper: `{"data": {"children": [...]}}`.
#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<RedditItem>,
}

/// A raw Reddit thing (`t3` post or `t1` comment), kept as loose JSON so
/// unexpected fields survive until normalization flattens them.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditItem {
    #[serde(default)]
    pub kind: String,
    pub data: Map<String, Value>,
}

impl RedditItem {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    fn is_comment(&self) -> bool {
        self.kind == "t1"
    }
}

impl HarvestItem for RedditItem {
    fn item_id(&self) -> &str {
        self.str_field("name").unwrap_or_default()
    }

    fn normalize(&self, source_key: &str) -> Result<NormalizedPost, HarvestError> {
        let id = self.str_field("name").filter(|s| !s.is_empty()).ok_or_else(|| {
            HarvestError::Deserialize {
                context: format!("{source_key} item without a fullname"),
                source: serde_json::Error::custom("missing field `name`"),
            }
        })?;

        let content = if self.is_comment() {
            self.str_field("body").map(ToOwned::to_owned)
        } else {
            let title = self.str_field("title").unwrap_or_default();
            let selftext = self.str_field("selftext").unwrap_or_default();
            let joined = format!("{title}\n\n{selftext}");
            let trimmed = joined.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        };

        let created_at = self
            .data
            .get("created_utc")
            .and_then(Value::as_f64)
            .and_then(epoch_to_datetime);

        let mut extra = std::collections::BTreeMap::new();
        let mut put = |key: &str, value: String| {
            if !value.is_empty() {
                extra.insert(key.to_string(), value);
            }
        };

        for key in ["subreddit", "permalink", "url", "link_id", "parent_id"] {
            if let Some(v) = self.str_field(key) {
                put(key, v.to_string());
            }
        }
        for key in ["score", "num_comments"] {
            if let Some(v) = self.data.get(key).and_then(Value::as_i64) {
                put(key, v.to_string());
            }
        }
        if let Some(v) = self.data.get("link_flair_richtext") {
            put("link_flair_richtext", flatten_flair_richtext(v));
        }
        if let Some(v) = self.data.get("author_flair_richtext") {
            put("author_flair_richtext", flatten_flair_richtext(v));
        }
        if let Some(v) = self.data.get("all_awardings") {
            put("all_awardings", flatten_awardings(v));
        }
        if let Some(v) = self.data.get("gildings") {
            put("gildings", flatten_gildings(v));
        }
        if let Some(v) = self.data.get("media_metadata") {
            put("media_metadata", flatten_media_metadata(v));
        }

        Ok(NormalizedPost {
            id: id.to_string(),
            source_key: source_key.to_string(),
            author: self.str_field("author").map(ToOwned::to_owned),
            content,
            created_at,
            extra,
        })
    }
}

/// Reddit API client bound to one subreddit.
pub struct RedditSource {
    client: reqwest::Client,
    token: String,
    user_agent: String,
    subreddit: String,
    source_key: String,
    base_url: String,
}

impl RedditSource {
    /// Exchange client credentials for a token and bind to `subreddit`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] if the HTTP client cannot be built,
    /// or an HTTP/decode error if the token exchange fails.
    pub async fn connect(
        credentials: &RedditCredentials,
        subreddit: &str,
        timeout_secs: u64,
    ) -> Result<Self, HarvestError> {
        Self::connect_with_urls(credentials, subreddit, timeout_secs, AUTH_BASE_URL, API_BASE_URL)
            .await
    }

    /// [`RedditSource::connect`] with explicit auth/API base URLs, for tests
    /// against a mock server.
    ///
    /// # Errors
    ///
    /// Same as [`RedditSource::connect`].
    pub async fn connect_with_urls(
        credentials: &RedditCredentials,
        subreddit: &str,
        timeout_secs: u64,
        auth_base_url: &str,
        api_base_url: &str,
    ) -> Result<Self, HarvestError> {
        let source_key = format!("reddit:{subreddit}");
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarvestError::Config {
                source_key: source_key.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let token = Self::fetch_token(&client, credentials, auth_base_url).await?;

        Ok(Self {
            client,
            token,
            user_agent: credentials.user_agent.clone(),
            subreddit: subreddit.to_string(),
            source_key,
            base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_token(
        client: &reqwest::Client,
        credentials: &RedditCredentials,
        auth_base_url: &str,
    ) -> Result<String, HarvestError> {
        let url = format!("{auth_base_url}/api/v1/access_token");
        let response = client
            .post(&url)
            .header("User-Agent", &credentials.user_agent)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let token: TokenResponse =
            serde_json::from_slice(&response.bytes().await?).map_err(|e| {
                HarvestError::Deserialize {
                    context: "reddit token response".to_string(),
                    source: e,
                }
            })?;
        Ok(token.access_token)
    }

    async fn get_listing(&self, url: &str, query: &[(&str, String)]) -> Result<Listing, HarvestError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
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
                url: url.to_string(),
            });
        }

        serde_json::from_slice(&response.bytes().await?).map_err(|e| HarvestError::Deserialize {
            context: format!("{} listing", self.source_key),
            source: e,
        })
    }
}

#[async_trait]
impl FeedSource for RedditSource {
    type Item = RedditItem;

    fn source_key(&self) -> &str {
        &self.source_key
    }

    fn wants_comments(&self) -> bool {
        true
    }

    async fn fetch_latest(&self) -> Result<Option<RedditItem>, HarvestError> {
        let url = format!("{}/r/{}/new", self.base_url, self.subreddit);
        let listing = self
            .get_listing(&url, &[("limit", "1".to_string()), ("raw_json", "1".to_string())])
            .await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .find(|item| !item.item_id().is_empty()))
    }

    async fn fetch_page(
        &self,
        anchor: &str,
        limit: u32,
        direction: Direction,
    ) -> Result<Vec<RedditItem>, HarvestError> {
        let anchor_param = match direction {
            Direction::Older => "after",
            Direction::Newer => "before",
        };
        let url = format!("{}/r/{}/new", self.base_url, self.subreddit);
        let listing = self
            .get_listing(
                &url,
                &[
                    ("limit", limit.to_string()),
                    ("raw_json", "1".to_string()),
                    (anchor_param, anchor.to_string()),
                ],
            )
            .await?;

        let mut items: Vec<RedditItem> = listing
            .data
            .children
            .into_iter()
            .filter(|item| !item.item_id().is_empty())
            .collect();

        // The listing is newest-first. Walking older that already puts the
        // nearest-to-anchor item last; walking newer the farthest item must
        // come last instead.
        if direction == Direction::Newer {
            items.reverse();
        }
        Ok(items)
    }
}

#[async_trait]
impl CommentSource for RedditSource {
    type Item = RedditItem;

    fn source_key(&self) -> &str {
        &self.source_key
    }

    async fn fetch_comments(&self, post_id: &str) -> Result<Vec<RedditItem>, HarvestError> {
        let short_id = post_id.strip_prefix("t3_").unwrap_or(post_id);
        let url = format!("{}/comments/{short_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", &self.user_agent)
            .query(&[
                ("limit", COMMENT_PAGE_LIMIT.to_string()),
                ("raw_json", "1".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(HarvestError::RateLimited {
                source_key: self.source_key.clone(),
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            return Err(HarvestError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        // The endpoint answers with `[post listing, comment listing]`.
        let body: Value =
            serde_json::from_slice(&response.bytes().await?).map_err(|e| {
                HarvestError::Deserialize {
                    context: format!("{} comment thread {post_id}", self.source_key),
                    source: e,
                }
            })?;
        let comment_listing = body.get(1).cloned().unwrap_or(Value::Null);
        Ok(collect_comments(&comment_listing))
    }
}

/// Walk a comment listing depth-first, collecting every `t1` item including
/// nested replies.
fn collect_comments(listing: &Value) -> Vec<RedditItem> {
    let mut comments = Vec::new();
    let mut stack: Vec<&Value> = vec![listing];

    while let Some(node) = stack.pop() {
        let Some(children) = node
            .get("data")
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        for child in children {
            if child.get("kind").and_then(Value::as_str) != Some("t1") {
                continue;
            }
            if let Some(data) = child.get("data").and_then(Value::as_object) {
                comments.push(RedditItem {
                    kind: "t1".to_string(),
                    data: data.clone(),
                });
                if let Some(replies) = data.get("replies") {
                    if replies.is_object() {
                        stack.push(replies);
                    }
                }
            }
        }
    }
    comments
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(kind: &str, data: Value) -> RedditItem {
        RedditItem {
            kind: kind.to_string(),
            data: data.as_object().expect("object").clone(),
        }
    }

    #[test]
    fn post_normalizes_title_and_selftext() {
        let raw = item(
            "t3",
            json!({
                "name": "t3_abc",
                "title": "Rain tomorrow",
                "selftext": "Bring an umbrella.",
                "author": "weather_bot",
                "subreddit": "melbourne",
                "created_utc": 1_714_521_600.0,
                "score": 12,
            }),
        );
        let post = raw.normalize("reddit:melbourne").expect("should normalize");
        assert_eq!(post.id, "t3_abc");
        assert_eq!(post.author.as_deref(), Some("weather_bot"));
        assert_eq!(post.content.as_deref(), Some("Rain tomorrow\n\nBring an umbrella."));
        assert_eq!(post.extra.get("score").map(String::as_str), Some("12"));
        assert!(post.created_at.is_some());
    }

    #[test]
    fn comment_normalizes_body() {
        let raw = item(
            "t1",
            json!({
                "name": "t1_xyz",
                "body": "hard agree",
                "author": "someone",
                "link_id": "t3_abc",
                "parent_id": "t3_abc",
            }),
        );
        let post = raw.normalize("reddit:melbourne").expect("should normalize");
        assert_eq!(post.content.as_deref(), Some("hard agree"));
        assert_eq!(post.extra.get("link_id").map(String::as_str), Some("t3_abc"));
    }

    #[test]
    fn item_without_fullname_fails_normalization() {
        let raw = item("t3", json!({"title": "orphan"}));
        assert!(matches!(
            raw.normalize("reddit:melbourne"),
            Err(HarvestError::Deserialize { .. })
        ));
    }

    #[test]
    fn flair_lists_are_flattened_into_strings() {
        let raw = item(
            "t3",
            json!({
                "name": "t3_abc",
                "title": "t",
                "link_flair_richtext": [{"t": "Serious"}, {"t": "Replies Only"}],
                "all_awardings": [{"id": "a", "name": "Gold", "count": 1}],
            }),
        );
        let post = raw.normalize("reddit:melbourne").unwrap();
        assert_eq!(
            post.extra.get("link_flair_richtext").map(String::as_str),
            Some("Serious Replies Only")
        );
        assert_eq!(
            post.extra.get("all_awardings").map(String::as_str),
            Some("a:Gold:1")
        );
    }

    #[test]
    fn collect_comments_walks_nested_replies() {
        let listing = json!({
            "data": {"children": [
                {"kind": "t1", "data": {
                    "name": "t1_top",
                    "body": "top level",
                    "replies": {"data": {"children": [
                        {"kind": "t1", "data": {"name": "t1_nested", "body": "nested", "replies": ""}}
                    ]}}
                }},
                {"kind": "more", "data": {"count": 3}}
            ]}
        });
        let comments = collect_comments(&listing);
        let ids: Vec<&str> = comments.iter().map(HarvestItem::item_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"t1_top"));
        assert!(ids.contains(&"t1_nested"));
    }
}
