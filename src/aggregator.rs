//! Sender aggregation: fold message metadata into per-sender rollups

use std::collections::HashMap;
use tracing::trace;

use crate::models::{MessageMetadata, ScanScope, Sender};

/// Accumulates scanned messages into senders keyed by normalized address
///
/// The upsert is a keyed merge, so the final map does not depend on the
/// order messages arrive in. Messages the user sent, and (in inbox scope)
/// messages the user already organized under their own labels, are skipped
/// and counted instead of aggregated.
#[derive(Debug)]
pub struct SenderAggregator {
    scope: ScanScope,
    senders: HashMap<String, Sender>,
    skipped_sent: usize,
    skipped_labeled: usize,
    included: usize,
}

impl SenderAggregator {
    pub fn new(scope: ScanScope) -> Self {
        Self {
            scope,
            senders: HashMap::new(),
            skipped_sent: 0,
            skipped_labeled: 0,
            included: 0,
        }
    }

    /// Fold one message into the aggregation
    pub fn ingest(&mut self, msg: &MessageMetadata) {
        if msg.label_ids.iter().any(|l| l == "SENT") {
            self.skipped_sent += 1;
            return;
        }

        // User labels carry a Label_ prefix; system labels are bare names.
        // In inbox scope a user label means the user already sorted this
        // mail, so leave it alone.
        if self.scope == ScanScope::Inbox
            && msg.label_ids.iter().any(|l| l.starts_with("Label_"))
        {
            self.skipped_labeled += 1;
            return;
        }

        self.included += 1;

        let entry = self
            .senders
            .entry(msg.sender_email.clone())
            .or_insert_with(|| Sender {
                email: msg.sender_email.clone(),
                name: msg.sender_name.clone(),
                count: 0,
                message_ids: Vec::new(),
                last_email_date: 0,
                unsubscribe: None,
            });

        entry.count += 1;
        entry.message_ids.push(msg.id.clone());
        entry.last_email_date = entry.last_email_date.max(msg.date);

        // First parseable unsubscribe wins; later headers never overwrite it
        if entry.unsubscribe.is_none() {
            if let Some(info) = &msg.unsubscribe {
                trace!("Recorded unsubscribe target for {}", entry.email);
                entry.unsubscribe = Some(info.clone());
            }
        }
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    pub fn skipped_sent(&self) -> usize {
        self.skipped_sent
    }

    pub fn skipped_labeled(&self) -> usize {
        self.skipped_labeled
    }

    pub fn included(&self) -> usize {
        self.included
    }

    /// Consume the aggregation, returning senders sorted by count descending
    /// (ties broken by address so the ordering is deterministic)
    pub fn into_senders(self) -> Vec<Sender> {
        let mut senders: Vec<Sender> = self.senders.into_values().collect();
        senders.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.email.cmp(&b.email)));
        senders
    }
}
