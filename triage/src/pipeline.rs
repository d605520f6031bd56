//! Pipeline orchestrator
//!
//! Wires document change signals and the periodic full scan to the
//! scheduler, tracker, classifier and cache, and reports labels to the
//! presenter. All state is mutated on the event loop; poll timers and
//! classification jobs run as spawned tasks that post their completion back
//! into the loop's channel.

use chrono::Utc;
use flume::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::CategoryStore;
use crate::category::Category;
use crate::classifier::{Classifier, Verdict, VerdictSource};
use crate::config::TriageConfig;
use crate::document::{Document, DocumentEvent, ItemContent, Presenter};
use crate::scheduler::{
    Observation, PollDecision, ReclassificationScheduler, RetryPolicy, Ticket,
};
use crate::settings::Settings;
use crate::store::KeyValueStore;
use crate::tracker::ChangeTracker;

/// Messages consumed by the event loop
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Document(DocumentEvent),
    /// Run a full scan now
    Scan,
    PollDue {
        item_id: String,
        ticket: Ticket,
    },
    Classified {
        item_id: String,
        ticket: Ticket,
        verdict: Verdict,
        degraded: bool,
    },
    ClearCache,
    ReloadSettings,
    Shutdown,
}

impl From<DocumentEvent> for PipelineEvent {
    fn from(event: DocumentEvent) -> Self {
        PipelineEvent::Document(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    Only(Category),
}

/// Result of a filter request: which items to show and which to hide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterView {
    pub visible: Vec<String>,
    pub hidden: Vec<String>,
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub classified: u64,
    pub degraded: u64,
    pub remote: u64,
    pub fallback: u64,
    pub cache_hits: u64,
    pub evicted: u64,
    pub aborted: u64,
    pub dropped: u64,
}

/// Everything a session needs, loaded once at bootstrap
pub struct TriageContext {
    pub config: TriageConfig,
    pub backend: Arc<dyn KeyValueStore>,
    pub settings: Settings,
    pub classifier: Arc<Classifier>,
}

impl TriageContext {
    /// Load settings and build the classifier. Store or client failures
    /// degrade to defaults and local-only classification.
    pub fn bootstrap(config: TriageConfig, backend: Arc<dyn KeyValueStore>) -> Self {
        let settings = Self::load_settings(backend.as_ref());
        let classifier = Self::build_classifier(&config, &settings);

        Self {
            config,
            backend,
            settings,
            classifier: Arc::new(classifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Re-read settings and rebuild the classifier.
    pub fn reload(&mut self) {
        self.settings = Self::load_settings(self.backend.as_ref());
        self.classifier = Arc::new(Self::build_classifier(&self.config, &self.settings));
    }

    fn load_settings(backend: &dyn KeyValueStore) -> Settings {
        Settings::load(backend).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load settings, using defaults");
            Settings::default()
        })
    }

    fn build_classifier(config: &TriageConfig, settings: &Settings) -> Classifier {
        Classifier::from_settings(&config.classifier, &config.remote, settings).unwrap_or_else(
            |e| {
                warn!(error = %e, "Remote classifier unavailable, using local rules only");
                Classifier::local(&config.classifier)
            },
        )
    }
}

pub struct Pipeline<D, P> {
    context: TriageContext,
    document: D,
    presenter: P,
    store: CategoryStore,
    tracker: ChangeTracker,
    scheduler: ReclassificationScheduler,
    labels: HashMap<String, Category>,
    stats: PipelineStats,
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
}

impl<D: Document, P: Presenter> Pipeline<D, P> {
    /// Create a pipeline and validate the cache epoch. Cached categories
    /// are not trusted before this point.
    pub fn new(context: TriageContext, document: D, presenter: P) -> Self {
        let mut store = CategoryStore::new(context.backend.clone(), &context.config.cache);
        if store.validate_epoch() {
            info!(records = store.len(), "Loaded classification cache");
        } else {
            info!("Classification cache reset");
        }

        let scheduler = ReclassificationScheduler::new(RetryPolicy::from(&context.config.scheduler));
        let (tx, rx) = flume::unbounded();

        Self {
            context,
            document,
            presenter,
            store,
            tracker: ChangeTracker::new(),
            scheduler,
            labels: HashMap::new(),
            stats: PipelineStats::default(),
            tx,
            rx,
        }
    }

    /// Sender for document adapters and control messages
    pub fn sender(&self) -> Sender<PipelineEvent> {
        self.tx.clone()
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn store(&self) -> &CategoryStore {
        &self.store
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &ReclassificationScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn label(&self, item_id: &str) -> Option<Category> {
        self.labels.get(item_id).copied()
    }

    /// Categories the user enabled as filter buttons
    pub fn filter_categories(&self) -> &[Category] {
        &self.context.settings.categories
    }

    /// Run the event loop: an initial scan, then events and periodic full
    /// scans until `Shutdown`.
    pub async fn run(&mut self) {
        let ids = self.document.item_ids();
        self.on_initial_scan(&ids);

        let rx = self.rx.clone();
        let period = self.context.config.scan.interval();
        let mut scan = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                event = rx.recv_async() => match event {
                    Ok(PipelineEvent::Shutdown) | Err(_) => break,
                    Ok(event) => self.handle(event),
                },
                _ = scan.tick() => self.full_scan(),
            }
        }

        info!(stats = ?self.stats, "Pipeline stopped");
    }

    /// Process events for `duration`, whatever arrives.
    pub async fn run_for(&mut self, duration: Duration) {
        let rx = self.rx.clone();
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            tokio::select! {
                event = rx.recv_async() => match event {
                    Ok(event) => self.handle(event),
                    Err(_) => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }

    /// Process events until no item is polling or dispatching.
    pub async fn settle(&mut self) {
        let rx = self.rx.clone();
        while !self.scheduler.is_idle() {
            match rx.recv_async().await {
                Ok(PipelineEvent::Shutdown) => continue,
                Ok(event) => self.handle(event),
                Err(_) => break,
            }
        }
    }

    pub fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Document(event) => self.on_document_event(event),
            PipelineEvent::Scan => self.full_scan(),
            PipelineEvent::PollDue { item_id, ticket } => self.poll(&item_id, ticket),
            PipelineEvent::Classified {
                item_id,
                ticket,
                verdict,
                degraded,
            } => self.on_classified(&item_id, ticket, verdict, degraded),
            PipelineEvent::ClearCache => self.clear_cache(),
            PipelineEvent::ReloadSettings => self.reload_settings(),
            PipelineEvent::Shutdown => {}
        }
    }

    pub fn on_document_event(&mut self, event: DocumentEvent) {
        match event {
            DocumentEvent::ItemAdded(id) => self.scan_item(&id),
            DocumentEvent::ItemChanged(id) | DocumentEvent::UnreadIndicatorAppeared(id) => {
                self.on_change_signal(&id)
            }
            DocumentEvent::UnreadIndicatorRemoved(id) => self.on_read_signal(&id),
            DocumentEvent::ItemRemoved(id) => self.on_item_removed(&id),
        }
    }

    /// First scan of a session: classify unread items, restore cached
    /// labels for read ones.
    pub fn on_initial_scan(&mut self, item_ids: &[String]) {
        info!(items = item_ids.len(), "Initial scan");
        for id in item_ids {
            self.scan_item(id);
        }
    }

    pub fn full_scan(&mut self) {
        let ids = self.document.item_ids();
        debug!(items = ids.len(), "Full scan");
        for id in &ids {
            self.scan_item(id);
        }
    }

    /// Unread items are always reclassified from their content, never from
    /// the cache. Read items only get a label back from the cache.
    fn scan_item(&mut self, item_id: &str) {
        let unread = match self.document.read_unread_flag(item_id) {
            Some(unread) => unread,
            None => {
                debug!(item_id = %item_id, "Item not found during scan");
                return;
            }
        };

        if !unread {
            self.restore_cached_label(item_id);
            return;
        }

        if self.document.read_text(item_id).is_some() {
            self.start(item_id);
        }
    }

    /// A badge appeared or the snippet mutated.
    pub fn on_change_signal(&mut self, item_id: &str) {
        match self.document.read_unread_flag(item_id) {
            Some(true) => self.start(item_id),
            Some(false) => self.restore_cached_label(item_id),
            None => debug!(item_id = %item_id, "Change signal for missing item"),
        }
    }

    /// The unread indicator was removed: the item loses its label, cache
    /// entry and fingerprint.
    pub fn on_read_signal(&mut self, item_id: &str) {
        self.scheduler.abort(item_id);
        self.store.delete(item_id);
        self.tracker.forget(item_id);

        if self.labels.remove(item_id).is_some() {
            self.presenter.on_evicted(item_id);
            self.stats.evicted += 1;
            debug!(item_id = %item_id, "Item read, label evicted");
        }
    }

    /// The element left the list. Its cache entry stays for when it comes
    /// back; the drawn label goes with it.
    fn on_item_removed(&mut self, item_id: &str) {
        if self.scheduler.abort(item_id) {
            self.stats.aborted += 1;
            debug!(item_id = %item_id, "Item removed while pending");
        }
        if self.labels.remove(item_id).is_some() {
            self.presenter.on_evicted(item_id);
        }
    }

    /// Which items to show for a filter button. Reads applied labels only.
    pub fn on_filter_request(&self, filter: CategoryFilter) -> FilterView {
        let mut view = FilterView::default();
        for id in self.document.item_ids() {
            let show = match filter {
                CategoryFilter::All => true,
                CategoryFilter::Only(category) => self.labels.get(&id) == Some(&category),
            };
            if show {
                view.visible.push(id);
            } else {
                view.hidden.push(id);
            }
        }
        view
    }

    /// Drop every cached category and label, then rescan.
    pub fn clear_cache(&mut self) {
        info!("Clearing classification cache");
        self.store.clear();
        self.tracker.clear();
        self.scheduler.clear();

        for id in self.labels.keys() {
            self.presenter.on_evicted(id);
        }
        self.stats.evicted += self.labels.len() as u64;
        self.labels.clear();

        self.full_scan();
    }

    pub fn reload_settings(&mut self) {
        self.context.reload();
        info!(
            remote = self.context.classifier.has_remote(),
            categories = self.context.settings.categories.len(),
            "Settings reloaded"
        );
    }

    fn restore_cached_label(&mut self, item_id: &str) {
        if let Some(category) = self.store.get_at(item_id, Utc::now()) {
            if self.labels.get(item_id) != Some(&category) {
                self.labels.insert(item_id.to_string(), category);
                self.presenter.on_classified(item_id, category);
                self.stats.cache_hits += 1;
            }
        }
    }

    fn start(&mut self, item_id: &str) {
        if let Some(ticket) = self.scheduler.signal(item_id) {
            debug!(item_id = %item_id, ticket, "Polling for content");
            self.poll(item_id, ticket);
        }
    }

    fn poll(&mut self, item_id: &str, ticket: Ticket) {
        let content = self.document.read_text(item_id);
        let observation = match &content {
            None => Observation::Missing,
            Some(c) if self.tracker.has_meaningful_change(item_id, &c.text) => {
                Observation::Changed
            }
            Some(_) => Observation::Unchanged,
        };

        match (self.scheduler.poll(item_id, ticket, observation), content) {
            (PollDecision::Dispatch { degraded, attempts }, Some(content)) => {
                if degraded {
                    warn!(
                        item_id = %item_id,
                        attempts,
                        degraded = true,
                        "Content never changed, classifying what is visible"
                    );
                }
                self.tracker.commit(item_id, &content.text);
                self.dispatch(item_id, ticket, content, degraded);
            }
            (PollDecision::Dispatch { .. }, None) => {
                self.scheduler.abort(item_id);
            }
            (PollDecision::Retry { attempt, delay }, _) => {
                self.schedule_poll(item_id, ticket, delay);
                debug!(item_id = %item_id, attempt, "Content unchanged, retrying");
            }
            (PollDecision::Abort, _) => {
                self.stats.aborted += 1;
                debug!(item_id = %item_id, "Item gone while polling");
            }
            (PollDecision::Stale, _) => {
                debug!(item_id = %item_id, ticket, "Ignoring stale poll");
            }
        }
    }

    fn schedule_poll(&self, item_id: &str, ticket: Ticket, delay: Duration) {
        let tx = self.tx.clone();
        let item_id = item_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(PipelineEvent::PollDue { item_id, ticket });
        });
    }

    fn dispatch(&self, item_id: &str, ticket: Ticket, content: ItemContent, degraded: bool) {
        let tx = self.tx.clone();
        let classifier = self.context.classifier.clone();
        let item_id = item_id.to_string();
        tokio::spawn(async move {
            let verdict = classifier
                .classify_detailed(&content.text, &content.sender, &content.subject)
                .await;
            let _ = tx.send(PipelineEvent::Classified {
                item_id,
                ticket,
                verdict,
                degraded,
            });
        });
    }

    fn on_classified(&mut self, item_id: &str, ticket: Ticket, verdict: Verdict, degraded: bool) {
        if !self.scheduler.finish(item_id, ticket) {
            self.stats.dropped += 1;
            debug!(item_id = %item_id, "Dropping result of an aborted activation");
            return;
        }

        self.store.set(item_id, verdict.category);
        self.labels.insert(item_id.to_string(), verdict.category);
        self.presenter.on_classified(item_id, verdict.category);

        self.stats.classified += 1;
        if degraded {
            self.stats.degraded += 1;
        }
        match verdict.source {
            VerdictSource::Remote => self.stats.remote += 1,
            VerdictSource::Fallback => self.stats.fallback += 1,
            VerdictSource::Local => {}
        }

        info!(
            item_id = %item_id,
            category = %verdict.category,
            source = ?verdict.source,
            degraded,
            "Classified"
        );
    }
}
