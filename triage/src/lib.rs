//! Incremental conversation triage
//!
//! Classifies a live, externally mutating list of conversations into a fixed
//! set of categories, without reclassifying content it has already seen.
//!
//! ## Module Organization
//!
//! - `pipeline`: event loop wiring signals to the components below
//! - `scheduler`: per-item polling state machine
//! - `tracker`: content fingerprints for change detection
//! - `classifier`: local keyword rules with a remote fallback
//! - `cache`: per-item category cache with a global validity epoch
//! - `store`: persistent key-value store (SQLite, in-memory)
//! - `settings`: user settings kept in the store
//! - `document`: adapter traits for the rendered list and its labels
//! - `config`: static TOML configuration

pub mod cache;
pub mod category;
pub mod classifier;
pub mod config;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod tracker;

pub use cache::{CacheEpoch, CategoryStore, ClassificationRecord, CACHE_VERSION};
pub use category::Category;
pub use classifier::{Classifier, RemoteClassifier, Verdict, VerdictSource};
pub use config::TriageConfig;
pub use document::{Document, DocumentEvent, ItemContent, Presenter};
pub use error::{Result, TriageError};
pub use pipeline::{CategoryFilter, FilterView, Pipeline, PipelineEvent, PipelineStats, TriageContext};
pub use scheduler::{PollState, ReclassificationScheduler, RetryPolicy};
pub use settings::Settings;
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use tracker::ChangeTracker;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise debug builds log this crate at debug
/// and everything else at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("triage=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
