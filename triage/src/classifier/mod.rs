//! Conversation classification
//!
//! Local keyword rules run first. A local match is trusted only when its
//! score reaches the configured minimum; otherwise the item goes to the
//! remote classifier when one is configured, or falls back to `Other`.
//! Classification never fails: every error path ends in `Other`.

pub mod remote;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use remote::{HttpRemoteClassifier, RemoteClassifier};
pub use rules::{KeywordRules, LocalScore};

use crate::category::Category;
use crate::config::{ClassifierConfig, RemoteConfig};
use crate::error::{Result, TriageError};
use crate::settings::Settings;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Local,
    Remote,
    /// Rules inconclusive and the remote path unavailable or failed
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub category: Category,
    pub source: VerdictSource,
    /// Best local score, even when it was not trusted
    pub score: u32,
}

pub struct Classifier {
    rules: KeywordRules,
    min_score: u32,
    remote: Option<Arc<dyn RemoteClassifier>>,
    remote_timeout: Duration,
}

impl Classifier {
    /// Local rules only
    pub fn local(config: &ClassifierConfig) -> Self {
        let mut rules = KeywordRules::default();
        for (category, words) in config.extra_keywords() {
            rules.extend(category, words);
        }

        Self {
            rules,
            min_score: config.min_score,
            remote: None,
            remote_timeout: RemoteConfig::default().timeout(),
        }
    }

    /// Build from configuration and user settings. The remote classifier is
    /// attached only when the settings enable it.
    pub fn from_settings(
        config: &ClassifierConfig,
        remote_config: &RemoteConfig,
        settings: &Settings,
    ) -> Result<Self> {
        let classifier = Self::local(config);
        if !settings.remote_enabled() {
            return Ok(classifier);
        }

        let remote = HttpRemoteClassifier::new(remote_config, &settings.api_key)?;
        Ok(classifier.with_remote(Arc::new(remote), remote_config.timeout()))
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteClassifier>, timeout: Duration) -> Self {
        self.remote = Some(remote);
        self.remote_timeout = timeout;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Run the local rules only.
    pub fn classify_local(&self, text: &str, sender: &str, subject: &str) -> Option<LocalScore> {
        let hay = rules::haystack(text, sender, subject);
        self.rules.best(&hay)
    }

    pub async fn classify(&self, text: &str, sender: &str, subject: &str) -> Category {
        self.classify_detailed(text, sender, subject).await.category
    }

    pub async fn classify_detailed(&self, text: &str, sender: &str, subject: &str) -> Verdict {
        let best = self.classify_local(text, sender, subject);
        let score = best.map(|b| b.score).unwrap_or(0);

        if let Some(best) = best.filter(|b| b.score >= self.min_score) {
            debug!(category = %best.category, score = best.score, "Local rules matched");
            return Verdict {
                category: best.category,
                source: VerdictSource::Local,
                score,
            };
        }

        let remote = match &self.remote {
            Some(remote) => remote,
            None => {
                return Verdict {
                    category: Category::Other,
                    source: VerdictSource::Fallback,
                    score,
                }
            }
        };

        match self.ask_remote(remote.as_ref(), text, sender, subject).await {
            Ok(category) => {
                debug!(category = %category, "Remote classifier answered");
                Verdict {
                    category,
                    source: VerdictSource::Remote,
                    score,
                }
            }
            Err(e) => {
                warn!(error = %e, "Remote classification failed, using Other");
                Verdict {
                    category: Category::Other,
                    source: VerdictSource::Fallback,
                    score,
                }
            }
        }
    }

    async fn ask_remote(
        &self,
        remote: &dyn RemoteClassifier,
        text: &str,
        sender: &str,
        subject: &str,
    ) -> Result<Category> {
        let prompt = remote::build_prompt(text, sender, subject);
        let timeout_ms = self.remote_timeout.as_millis() as u64;

        let answer = tokio::time::timeout(self.remote_timeout, remote.classify(&prompt))
            .await
            .map_err(|_| TriageError::Timeout(timeout_ms))??;

        remote::parse_answer(&answer)
    }
}
