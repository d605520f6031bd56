//! Replay a recorded conversation-list scenario through the pipeline.
//!
//! The scenario is a JSON file with the initial items and a timed list of
//! mutations. Each mutation updates the in-memory document and emits the
//! matching change signal, the way a live document adapter would.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use triage::document::{MemoryDocument, RecordingPresenter};
use triage::{
    Document, DocumentEvent, ItemContent, KeyValueStore, MemoryStore, Pipeline, PipelineEvent,
    SqliteStore, TriageConfig, TriageContext, TriageError,
};

#[derive(Debug, Parser)]
#[command(name = "triage-replay", about = "Replay a scenario through the triage pipeline")]
struct Args {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Config file; defaults to the standard config locations
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist the cache in this SQLite file instead of memory
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    items: Vec<ScenarioItem>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct ScenarioItem {
    id: String,
    #[serde(flatten)]
    content: ItemContent,
    #[serde(default)]
    unread: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Step {
    #[serde(default)]
    after_ms: u64,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum Action {
    Add(ScenarioItem),
    SetText { id: String, text: String },
    MarkUnread { id: String },
    MarkRead { id: String },
    Remove { id: String },
    Scan,
    ClearCache,
}

fn apply(document: &MemoryDocument, action: Action) -> PipelineEvent {
    match action {
        Action::Add(item) => {
            document.insert(&item.id, item.content, item.unread);
            DocumentEvent::ItemAdded(item.id).into()
        }
        Action::SetText { id, text } => {
            document.set_text(&id, &text);
            DocumentEvent::ItemChanged(id).into()
        }
        Action::MarkUnread { id } => {
            document.set_unread(&id, true);
            DocumentEvent::UnreadIndicatorAppeared(id).into()
        }
        Action::MarkRead { id } => {
            document.set_unread(&id, false);
            DocumentEvent::UnreadIndicatorRemoved(id).into()
        }
        Action::Remove { id } => {
            document.remove(&id);
            DocumentEvent::ItemRemoved(id).into()
        }
        Action::Scan => PipelineEvent::Scan,
        Action::ClearCache => PipelineEvent::ClearCache,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), TriageError> {
    triage::init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TriageConfig::load(path)?,
        None => TriageConfig::discover()?,
    };

    let raw = std::fs::read_to_string(&args.scenario)?;
    let scenario: Scenario = serde_json::from_str(&raw)?;

    let backend: Arc<dyn KeyValueStore> = match &args.db {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let document = MemoryDocument::new();
    for item in scenario.items {
        document.insert(&item.id, item.content, item.unread);
    }

    let context = TriageContext::bootstrap(config, backend);
    let mut pipeline = Pipeline::new(context, document.clone(), RecordingPresenter::new());

    let ids = document.item_ids();
    pipeline.on_initial_scan(&ids);

    for step in scenario.steps {
        pipeline.run_for(Duration::from_millis(step.after_ms)).await;
        let event = apply(&document, step.action);
        pipeline.handle(event);
    }

    pipeline.settle().await;

    for id in document.item_ids() {
        let label = pipeline
            .label(&id)
            .map(|c| c.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}", id, label);
    }

    info!(stats = ?pipeline.stats(), "Replay finished");
    Ok(())
}
