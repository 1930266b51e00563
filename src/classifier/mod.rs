//! Approve/reject decisions for single text items
//!
//! A remote endpoint is preferred; when it cannot give an answer the local
//! email-format heuristic decides that one item instead.

pub mod heuristic;
pub mod remote;

pub use heuristic::HeuristicClassifier;
pub use remote::{RemoteClassifier, RemoteStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClassifierConfig;

/// Errors that can occur while classifying an item
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("Malformed response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecognized response: {0}")]
    Decode(String),
}

/// Which path produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Remote,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    pub message: String,
    pub source: VerdictSource,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassifyError>;
}

/// Remote verdict with a per-item heuristic fallback; never fails
pub struct ItemClassifier {
    remote: Option<Box<dyn Classifier>>,
    heuristic: HeuristicClassifier,
}

impl ItemClassifier {
    /// Uses only the local heuristic
    pub fn offline() -> Self {
        ItemClassifier {
            remote: None,
            heuristic: HeuristicClassifier::new(),
        }
    }

    pub fn with_remote(remote: Box<dyn Classifier>) -> Self {
        ItemClassifier {
            remote: Some(remote),
            heuristic: HeuristicClassifier::new(),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        match &config.endpoint {
            Some(endpoint) => match RemoteClassifier::new(endpoint, config.timeout_secs) {
                Ok(remote) => {
                    log::info!("Using remote classifier at {}", endpoint);
                    Self::with_remote(Box::new(remote))
                }
                Err(e) => {
                    log::error!(
                        "Cannot build HTTP client for {}, using offline check: {}",
                        endpoint,
                        e
                    );
                    Self::offline()
                }
            },
            None => {
                log::info!("No classifier endpoint configured, using offline check");
                Self::offline()
            }
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[async_trait]
impl Classifier for ItemClassifier {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassifyError> {
        if let Some(remote) = &self.remote {
            match remote.classify(text).await {
                Ok(verdict) => return Ok(verdict),
                Err(e) => log::warn!("Remote classifier unavailable, using offline check: {}", e),
            }
        }
        self.heuristic.classify(text).await
    }
}
