//! Sentiment annotation: scorers and the store-driven annotation worker.

pub mod annotator;
pub mod client;
pub mod error;
pub mod scorer;

pub use annotator::{annotate, AnnotateReport, UNSCORED_LABEL};
pub use client::HttpScorer;
pub use error::SentimentError;
pub use scorer::{LexiconScorer, Scorer, SentimentScores};
