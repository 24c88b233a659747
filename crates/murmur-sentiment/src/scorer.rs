//! Three-class sentiment scoring.
//!
//! Two scorers implement the same contract: [`crate::client::HttpScorer`]
//! calls a remote inference service, and [`LexiconScorer`] is a
//! self-contained word-list fallback for deployments without one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SentimentError;

/// Class probabilities for one text. Not required to sum to exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub negative: f32,
    pub neutral: f32,
    pub positive: f32,
}

impl SentimentScores {
    /// The winning class name. Ties resolve in declaration order
    /// (negative, then neutral, then positive), so an all-zero score
    /// reads as negative rather than flapping between runs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        let mut best = ("negative", self.negative);
        for (name, value) in [("neutral", self.neutral), ("positive", self.positive)] {
            if value > best.1 {
                best = (name, value);
            }
        }
        best.0
    }
}

/// Anything that can turn text into class scores.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SentimentError::Scoring`] when the backing model or
    /// service cannot produce scores for `text`.
    async fn score(&self, text: &str) -> Result<SentimentScores, SentimentError>;
}

/// Word weights for the fallback scorer. Lowercase single words; positive
/// values in `(0.0, 1.0]`, negative in `[-1.0, 0.0)`.
const LEXICON: &[(&str, f32)] = &[
    ("great", 0.4),
    ("good", 0.3),
    ("excellent", 0.5),
    ("love", 0.5),
    ("loved", 0.5),
    ("best", 0.5),
    ("recommend", 0.4),
    ("amazing", 0.5),
    ("happy", 0.4),
    ("win", 0.4),
    ("thanks", 0.3),
    ("helpful", 0.4),
    ("bad", -0.4),
    ("terrible", -0.6),
    ("worst", -0.6),
    ("hate", -0.6),
    ("awful", -0.6),
    ("broken", -0.4),
    ("failed", -0.4),
    ("failure", -0.4),
    ("problem", -0.3),
    ("angry", -0.5),
    ("scam", -0.7),
    ("warning", -0.4),
];

/// Word-list scorer used when no scoring service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconScorer;

impl LexiconScorer {
    /// Sum matching word weights, clamped to `[-1.0, 1.0]`.
    fn polarity(text: &str) -> f32 {
        let mut score = 0.0_f32;
        for word in text.split_whitespace() {
            let w = word
                .trim_matches(|c: char| !c.is_alphabetic())
                .to_lowercase();
            for &(lex_word, weight) in LEXICON {
                if w == lex_word {
                    score += weight;
                    break;
                }
            }
        }
        score.clamp(-1.0, 1.0)
    }
}

#[async_trait]
impl Scorer for LexiconScorer {
    async fn score(&self, text: &str) -> Result<SentimentScores, SentimentError> {
        let polarity = Self::polarity(text);
        let positive = polarity.max(0.0);
        let negative = (-polarity).max(0.0);
        let neutral = 1.0 - positive - negative;
        Ok(SentimentScores {
            negative,
            neutral,
            positive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_the_largest_class() {
        let scores = SentimentScores {
            negative: 0.1,
            neutral: 0.2,
            positive: 0.7,
        };
        assert_eq!(scores.label(), "positive");
    }

    #[test]
    fn label_ties_resolve_in_class_order() {
        let scores = SentimentScores {
            negative: 0.5,
            neutral: 0.5,
            positive: 0.0,
        };
        assert_eq!(scores.label(), "negative");
        let scores = SentimentScores {
            negative: 0.0,
            neutral: 0.5,
            positive: 0.5,
        };
        assert_eq!(scores.label(), "neutral");
    }

    #[tokio::test]
    async fn lexicon_scores_positive_text_positive() {
        let scores = LexiconScorer.score("great service, love it").await.unwrap();
        assert!(scores.positive > scores.negative);
        assert_eq!(scores.label(), "positive");
    }

    #[tokio::test]
    async fn lexicon_scores_unknown_text_neutral() {
        let scores = LexiconScorer.score("the quick brown fox").await.unwrap();
        assert_eq!(scores.label(), "neutral");
        assert!((scores.neutral - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn lexicon_scores_negative_text_negative() {
        let scores = LexiconScorer.score("terrible, the worst scam").await.unwrap();
        assert_eq!(scores.label(), "negative");
    }
}
