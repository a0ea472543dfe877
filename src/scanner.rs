//! Scan orchestration: list, fetch, classify, persist

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::SenderAggregator;
use crate::classifier::{
    derive_categories, AiClassifier, CompletionProvider, PatternClassifier, SenderProfile,
};
use crate::client::{MailClient, ProgressCallback};
use crate::error::{CleanerError, Result};
use crate::models::{Progress, ScanScope, Snapshot};
use crate::store::SnapshotStore;

/// Message ids fetched concurrently per chunk
pub const FETCH_CHUNK_SIZE: usize = 50;

/// Default cap on messages examined per scan
pub const DEFAULT_MAX_MESSAGES: usize = 2000;

/// Cooperative cancellation handle
///
/// The orchestrator checks it at page and chunk boundaries only; an
/// in-flight request always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Pipeline phase for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Listing,
    Fetching,
    Classifying,
    Persisting,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Listing => "listing",
            ScanPhase::Fetching => "fetching",
            ScanPhase::Classifying => "classifying",
            ScanPhase::Persisting => "persisting",
        }
    }
}

/// Progress snapshot reported at phase transitions and chunk boundaries
#[derive(Debug, Clone, Copy)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl ScanProgress {
    fn new(phase: ScanPhase, processed: usize, total: usize) -> Self {
        let p = Progress::new(processed, total);
        Self {
            phase,
            processed: p.processed,
            total: p.total,
            percentage: p.percentage,
        }
    }
}

pub type ScanProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Tunable scan parameters, normally sourced from config
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub scope: ScanScope,
    pub page_size: u32,
    pub chunk_size: usize,
    pub max_messages: usize,
    pub ai_batch_size: usize,
    pub ai_batch_delay: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scope: ScanScope::Inbox,
            page_size: crate::client::MAX_PAGE_SIZE,
            chunk_size: FETCH_CHUNK_SIZE,
            max_messages: DEFAULT_MAX_MESSAGES,
            ai_batch_size: crate::classifier::DEFAULT_BATCH_SIZE,
            ai_batch_delay: crate::classifier::DEFAULT_BATCH_DELAY,
        }
    }
}

/// Summary returned from a completed scan
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub messages_scanned: usize,
    pub sender_count: usize,
    pub skipped_sent: usize,
    pub skipped_labeled: usize,
    pub category_count: usize,
    /// Whether the AI classifier produced the final classifications
    pub ai_classified: bool,
}

/// Drives the scan pipeline end to end
///
/// At most one scan runs at a time per orchestrator; a second start while
/// one is in flight fails with a state error. The snapshot is written only
/// after every phase completes, so cancellation or failure leaves the
/// previous snapshot untouched.
pub struct ScanOrchestrator {
    client: Arc<dyn MailClient>,
    store: Arc<dyn SnapshotStore>,
    provider: Option<Arc<dyn CompletionProvider>>,
    options: ScanOptions,
    in_flight: AtomicBool,
}

impl ScanOrchestrator {
    pub fn new(
        client: Arc<dyn MailClient>,
        store: Arc<dyn SnapshotStore>,
        options: ScanOptions,
    ) -> Self {
        Self {
            client,
            store,
            provider: None,
            options,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Enable AI classification; pattern rules remain the fallback
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Run a full scan
    pub async fn scan(
        &self,
        cancel: &CancelToken,
        on_progress: Option<ScanProgressCallback>,
    ) -> Result<ScanOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CleanerError::StateError(
                "A scan is already running".to_string(),
            ));
        }
        let _guard = InFlightGuard(&self.in_flight);

        let report = |phase: ScanPhase, processed: usize, total: usize| {
            if let Some(cb) = on_progress.as_ref() {
                cb(ScanProgress::new(phase, processed, total));
            }
        };

        // Phase 1: list message ids page by page
        report(ScanPhase::Listing, 0, 0);
        let ids = self.list_ids(cancel, &report).await?;
        info!(
            "Listed {} messages in scope {:?}",
            ids.len(),
            self.options.scope
        );

        // Phase 2: fetch metadata in concurrent chunks and aggregate
        let mut aggregator = SenderAggregator::new(self.options.scope);
        let total = ids.len();
        let mut fetched = 0;

        for chunk in ids.chunks(self.options.chunk_size.max(1)) {
            if cancel.is_cancelled() {
                info!("Scan cancelled during fetch ({}/{} messages)", fetched, total);
                return Err(CleanerError::Cancelled("scan".to_string()));
            }

            let fetches = chunk.iter().map(|id| self.client.get_message(id));
            for (id, result) in chunk.iter().zip(futures::future::join_all(fetches).await) {
                match result {
                    Ok(meta) => aggregator.ingest(&meta),
                    // One bad message never sinks the scan
                    Err(e) => warn!("Skipping message {}: {}", id, e),
                }
            }

            fetched += chunk.len();
            report(ScanPhase::Fetching, fetched, total);
        }

        let skipped_sent = aggregator.skipped_sent();
        let skipped_labeled = aggregator.skipped_labeled();
        let senders = aggregator.into_senders();
        debug!(
            "Aggregated {} senders ({} sent and {} user-labeled messages skipped)",
            senders.len(),
            skipped_sent,
            skipped_labeled
        );

        // Phase 3: classify
        report(ScanPhase::Classifying, 0, senders.len());
        let profiles: Vec<SenderProfile> = senders.iter().map(SenderProfile::from).collect();

        let (classifications, ai_classified) = match self.provider.as_ref() {
            Some(provider) => {
                let classifier = AiClassifier::new(Arc::clone(provider))
                    .with_batching(self.options.ai_batch_size, self.options.ai_batch_delay);

                // Surface per-batch progress through the scan callback
                let ai_progress: Option<ProgressCallback> = on_progress.as_ref().map(|cb| {
                    let cb = Arc::clone(cb);
                    Arc::new(move |p: Progress| {
                        cb(ScanProgress::new(ScanPhase::Classifying, p.processed, p.total));
                    }) as ProgressCallback
                });

                match classifier.classify_all(&profiles, ai_progress).await {
                    Ok(map) => (map, true),
                    Err(e) => {
                        // Fall back to patterns for the whole set so the
                        // snapshot never mixes classifier outputs
                        warn!("AI classification failed ({}), using pattern rules", e);
                        (PatternClassifier::new().classify_all(&profiles), false)
                    }
                }
            }
            None => (PatternClassifier::new().classify_all(&profiles), false),
        };
        report(ScanPhase::Classifying, senders.len(), senders.len());

        if cancel.is_cancelled() {
            info!("Scan cancelled before persisting");
            return Err(CleanerError::Cancelled("scan".to_string()));
        }

        // Phase 4: persist the completed snapshot
        report(ScanPhase::Persisting, 0, 1);
        let categories = derive_categories(&classifications);
        let snapshot = Snapshot {
            senders,
            classifications,
            categories,
            last_scan: Some(Utc::now()),
        };
        self.store.save(&snapshot).await?;
        report(ScanPhase::Persisting, 1, 1);

        info!(
            "Scan complete: {} messages, {} senders, {} categories",
            total,
            snapshot.senders.len(),
            snapshot.categories.len()
        );

        Ok(ScanOutcome {
            messages_scanned: total,
            sender_count: snapshot.senders.len(),
            skipped_sent,
            skipped_labeled,
            category_count: snapshot.categories.len(),
            ai_classified,
        })
    }

    async fn list_ids(
        &self,
        cancel: &CancelToken,
        report: &(dyn Fn(ScanPhase, usize, usize) + Sync),
    ) -> Result<Vec<String>> {
        let query = self.options.scope.query();
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                info!("Scan cancelled during listing ({} ids)", ids.len());
                return Err(CleanerError::Cancelled("scan".to_string()));
            }

            let page = self
                .client
                .list_messages(query, self.options.page_size, page_token.as_deref())
                .await?;

            ids.extend(page.ids);
            report(ScanPhase::Listing, ids.len(), ids.len());

            if ids.len() >= self.options.max_messages {
                ids.truncate(self.options.max_messages);
                debug!("Hit scan cap of {} messages", self.options.max_messages);
                break;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(ids)
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
