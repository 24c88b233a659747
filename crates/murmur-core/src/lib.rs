mod app_config;
mod config;
mod sources;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use sources::{
    KeywordRoute, MastodonSourceConfig, RedditSourceConfig, SourcesConfig, COMMENT_BACKLOG_STAGE,
    REDDIT_COMMENTS_INDEX, REDDIT_COMMENTS_STAGE,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
    #[error("failed to read sources config at {path}: {source}")]
    SourcesRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse sources config at {path}: {source}")]
    SourcesParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Which end of a source's cursor pair a harvest pass advances.
///
/// `Older` walks backwards through history from `min_id`; `Newer` follows
/// the live edge from `max_id`. The two directions are independent and may
/// run concurrently against the same cursor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Older,
    Newer,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Older => "older",
            Direction::Newer => "newer",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "older" | "old" => Ok(Direction::Older),
            "newer" | "new" => Ok(Direction::Newer),
            other => Err(format!("unknown direction: {other} (use older|newer)")),
        }
    }
}
