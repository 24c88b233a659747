//! Source and routing configuration, loaded from a YAML file.
//!
//! The file lists the feeds to harvest (subreddits and Mastodon servers)
//! and the keyword routes that copy matching documents into dedicated
//! indexes. Stage keys for the work queue are derived here so every
//! component agrees on them.

use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

/// Queue stage holding post ids awaiting comment harvesting.
pub const COMMENT_BACKLOG_STAGE: &str = "reddit:comments:backlog";

/// Queue stage holding normalized comments awaiting the sink.
pub const REDDIT_COMMENTS_STAGE: &str = "reddit:comments:posts";

/// Sink index for harvested Reddit comments.
pub const REDDIT_COMMENTS_INDEX: &str = "reddit-comments";

fn default_page_limit() -> u32 {
    40
}

fn default_max_docs() -> i64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditSourceConfig {
    /// Subreddit name without the `r/` prefix.
    pub subreddit: String,
    /// Sink index for posts from this subreddit.
    pub index: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl RedditSourceConfig {
    /// Stable cursor key for this subreddit.
    #[must_use]
    pub fn source_key(&self) -> String {
        format!("reddit:{}", self.subreddit)
    }

    /// Queue stage that harvested posts are pushed to.
    #[must_use]
    pub fn posts_stage(&self) -> String {
        format!("reddit:{}:posts", self.subreddit)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonSourceConfig {
    /// Base URL of the Mastodon server, e.g. `https://mastodon.social`.
    pub server: String,
    /// Sink index for posts from this server.
    pub index: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl MastodonSourceConfig {
    /// Stable cursor key for this server, derived from its host part.
    #[must_use]
    pub fn source_key(&self) -> String {
        format!("mastodon:{}", self.host())
    }

    /// Queue stage that harvested posts are pushed to.
    #[must_use]
    pub fn posts_stage(&self) -> String {
        format!("mastodon:{}:posts", self.host())
    }

    fn host(&self) -> &str {
        self.server
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }
}

/// One keyword route: copy matching documents from one index to another.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRoute {
    pub from_index: String,
    pub to_index: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_max_docs")]
    pub max_docs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub reddit: Vec<RedditSourceConfig>,
    #[serde(default)]
    pub mastodon: Vec<MastodonSourceConfig>,
    #[serde(default)]
    pub routes: Vec<KeywordRoute>,
}

impl SourcesConfig {
    /// Load and parse the sources file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SourcesRead`] if the file cannot be read, or
    /// [`ConfigError::SourcesParse`] if it is not valid YAML of this shape.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::SourcesRead {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&raw).map_err(|e| ConfigError::SourcesParse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Parse a sources config from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_yaml` error on malformed input.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
reddit:
  - subreddit: melbourne
    index: reddit-posts
  - subreddit: australia
    index: reddit-posts
    page_limit: 100
mastodon:
  - server: https://mastodon.au
    index: mastodon-posts
routes:
  - from_index: mastodon-posts
    to_index: election-posts
    keywords: [election, ballot, 'polling booth']
    max_docs: 200
";

    #[test]
    fn parses_sample_config() {
        let config = SourcesConfig::from_yaml(SAMPLE).expect("sample should parse");
        assert_eq!(config.reddit.len(), 2);
        assert_eq!(config.mastodon.len(), 1);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.reddit[0].page_limit, 40, "default page limit");
        assert_eq!(config.reddit[1].page_limit, 100);
        assert_eq!(config.routes[0].keywords.len(), 3);
        assert_eq!(config.routes[0].max_docs, 200);
    }

    #[test]
    fn reddit_stage_and_key_derivation() {
        let config = SourcesConfig::from_yaml(SAMPLE).unwrap();
        let sub = &config.reddit[0];
        assert_eq!(sub.source_key(), "reddit:melbourne");
        assert_eq!(sub.posts_stage(), "reddit:melbourne:posts");
    }

    #[test]
    fn mastodon_key_strips_scheme_and_trailing_slash() {
        let server = MastodonSourceConfig {
            server: "https://mastodon.au/".to_string(),
            index: "mastodon-posts".to_string(),
            page_limit: 40,
        };
        assert_eq!(server.source_key(), "mastodon:mastodon.au");
        assert_eq!(server.posts_stage(), "mastodon:mastodon.au:posts");
    }

    #[test]
    fn empty_sections_default_to_empty_vecs() {
        let config = SourcesConfig::from_yaml("routes: []").expect("should parse");
        assert!(config.reddit.is_empty());
        assert!(config.mastodon.is_empty());
        assert!(config.routes.is_empty());
    }

    #[test]
    fn route_defaults_max_docs() {
        let raw = r"
routes:
  - from_index: a
    to_index: b
    keywords: [x]
";
        let config = SourcesConfig::from_yaml(raw).unwrap();
        assert_eq!(config.routes[0].max_docs, 500);
    }
}
