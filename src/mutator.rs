//! Bulk mutation against the persisted snapshot

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::derive_categories;
use crate::client::{MailClient, ProgressCallback, MAX_PAGE_SIZE};
use crate::error::{CleanerError, Result};
use crate::models::{MutateAction, MutationOutcome, Sender};
use crate::parser;
use crate::store::SnapshotStore;

/// What a bulk operation applies to
#[derive(Debug, Clone)]
pub enum Selection {
    /// One sender by address
    Sender(String),
    /// Every sender classified under a category
    Category(String),
    /// An explicit set of sender addresses
    Senders(Vec<String>),
}

/// Result of a bulk mutation, including snapshot bookkeeping
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub outcome: MutationOutcome,
    /// Senders whose messages all mutated and were dropped from the snapshot
    pub senders_removed: usize,
    /// Senders kept because at least one of their messages failed
    pub senders_retained: usize,
}

/// Result of a category sort
#[derive(Debug, Clone)]
pub struct SortReport {
    pub outcome: MutationOutcome,
    /// Category labels applied, in the order they were processed
    pub labels: Vec<String>,
}

/// Gmail query matching all mail older than `days`
pub fn older_than_query(days: u32) -> String {
    format!("older_than:{}d", days)
}

/// Gmail query matching unread mail older than `days`
pub fn unread_older_than_query(days: u32) -> String {
    format!("is:unread older_than:{}d", days)
}

/// How an unsubscribe request was carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Caller should open this URL in a browser
    OpenUrl { url: String, one_click: bool },
    /// An unsubscribe mail was sent to this address
    EmailSent { to: String },
}

const DEFAULT_UNSUB_SUBJECT: &str = "Unsubscribe";
const DEFAULT_UNSUB_BODY: &str = "Please unsubscribe me from this mailing list.";

/// Applies trash/archive/delete operations to snapshot selections and keeps
/// the snapshot consistent with what actually happened
pub struct BulkMutator {
    client: Arc<dyn MailClient>,
    store: Arc<dyn SnapshotStore>,
}

impl BulkMutator {
    pub fn new(client: Arc<dyn MailClient>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { client, store }
    }

    /// Resolve a selection against the snapshot, mutate, and update the
    /// snapshot to match
    ///
    /// A sender is dropped from the snapshot only when every one of its
    /// messages mutated; senders touched by a failed chunk stay listed so
    /// a retry can pick them up.
    pub async fn execute(
        &self,
        selection: &Selection,
        action: &MutateAction,
        on_progress: Option<ProgressCallback>,
    ) -> Result<MutationReport> {
        let mut snapshot = self.store.load().await?.ok_or_else(|| {
            CleanerError::StateError("No snapshot found; run a scan first".to_string())
        })?;

        let emails = resolve_selection(selection, &snapshot.senders, &snapshot.classifications)?;
        let targets: HashSet<&str> = emails.iter().map(String::as_str).collect();

        let ids: Vec<String> = snapshot
            .senders
            .iter()
            .filter(|s| targets.contains(s.email.as_str()))
            .flat_map(|s| s.message_ids.iter().cloned())
            .collect();

        info!(
            "Applying {} to {} messages from {} senders",
            action.as_str(),
            ids.len(),
            emails.len()
        );

        let outcome = self.client.batch_mutate(&ids, action, on_progress).await?;

        let failed_ids: HashSet<&str> = outcome.failed_ids.iter().map(String::as_str).collect();

        let mut senders_removed = 0;
        let mut senders_retained = 0;
        snapshot.senders.retain(|s| {
            if !targets.contains(s.email.as_str()) {
                return true;
            }
            if s.message_ids.iter().any(|id| failed_ids.contains(id.as_str())) {
                warn!("Keeping {} in snapshot, some messages failed", s.email);
                senders_retained += 1;
                true
            } else {
                senders_removed += 1;
                false
            }
        });

        let kept: HashSet<&str> = snapshot
            .senders
            .iter()
            .map(|s| s.email.as_str())
            .collect();
        snapshot
            .classifications
            .retain(|email, _| kept.contains(email.as_str()));
        snapshot.categories = derive_categories(&snapshot.classifications);

        self.store.save(&snapshot).await?;

        info!(
            "{}: {} succeeded, {} failed; {} senders removed, {} retained",
            action.as_str(),
            outcome.success,
            outcome.failed,
            senders_removed,
            senders_retained
        );

        Ok(MutationReport {
            outcome,
            senders_removed,
            senders_retained,
        })
    }

    /// Apply each selected sender's category as a Gmail label
    ///
    /// Labels are created on demand, one per category, and applied with a
    /// chunked label mutation. The snapshot is not modified; a sorted
    /// message now carries a user label, so an inbox-scope rescan leaves
    /// it alone.
    pub async fn sort(
        &self,
        selection: &Selection,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SortReport> {
        let snapshot = self.store.load().await?.ok_or_else(|| {
            CleanerError::StateError("No snapshot found; run a scan first".to_string())
        })?;

        let emails = resolve_selection(selection, &snapshot.senders, &snapshot.classifications)?;
        let targets: HashSet<&str> = emails.iter().map(String::as_str).collect();

        // Group message ids by category, in a stable order
        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for sender in snapshot
            .senders
            .iter()
            .filter(|s| targets.contains(s.email.as_str()))
        {
            let category = snapshot
                .classifications
                .get(&sender.email)
                .cloned()
                .unwrap_or_else(|| "Other".to_string());
            by_category
                .entry(category)
                .or_default()
                .extend(sender.message_ids.iter().cloned());
        }

        let mut combined = MutationOutcome::default();
        let mut labels = Vec::new();

        for (category, ids) in by_category {
            let label_id = self.client.get_or_create_label(&category).await?;
            info!(
                "Labeling {} messages as {} ({})",
                ids.len(),
                category,
                label_id
            );

            let action = MutateAction::AddLabel(label_id);
            let outcome = self
                .client
                .batch_mutate(&ids, &action, on_progress.clone())
                .await?;

            combined.success += outcome.success;
            combined.failed += outcome.failed;
            combined.failed_ids.extend(outcome.failed_ids);
            combined.errors.extend(outcome.errors);
            labels.push(category);
        }

        info!(
            "Sort complete: {} labeled, {} failed across {} categories",
            combined.success,
            combined.failed,
            labels.len()
        );

        Ok(SortReport {
            outcome: combined,
            labels,
        })
    }

    /// Trash messages matching an age-based query, independent of the
    /// snapshot
    ///
    /// Lists matching ids up to `max_messages` and trashes them in bulk.
    /// Matching nothing is a normal empty outcome, not an error.
    pub async fn cleanup(
        &self,
        query: &str,
        max_messages: usize,
        on_progress: Option<ProgressCallback>,
    ) -> Result<MutationOutcome> {
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_messages(query, MAX_PAGE_SIZE, page_token.as_deref())
                .await?;
            ids.extend(page.ids);

            if ids.len() >= max_messages {
                ids.truncate(max_messages);
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if ids.is_empty() {
            info!("No messages match cleanup query '{}'", query);
            return Ok(MutationOutcome::default());
        }

        info!("Trashing {} messages matching '{}'", ids.len(), query);
        self.client
            .batch_mutate(&ids, &MutateAction::Trash, on_progress)
            .await
    }

    /// Carry out an unsubscribe for one sender
    ///
    /// An HTTP target is preferred and handed back for the caller to open.
    /// Otherwise a plain-text unsubscribe mail is sent to the mailto
    /// target, honoring any subject/body the mailto URI carries.
    pub async fn unsubscribe(&self, sender_email: &str) -> Result<UnsubscribeOutcome> {
        let snapshot = self.store.load().await?.ok_or_else(|| {
            CleanerError::StateError("No snapshot found; run a scan first".to_string())
        })?;

        let sender = snapshot.sender(sender_email).ok_or_else(|| {
            CleanerError::ValidationError(format!("Unknown sender: {}", sender_email))
        })?;

        let info = sender.unsubscribe.as_ref().ok_or_else(|| {
            CleanerError::ValidationError(format!(
                "{} has no unsubscribe information",
                sender_email
            ))
        })?;

        if let Some(url) = &info.http_url {
            return Ok(UnsubscribeOutcome::OpenUrl {
                url: url.clone(),
                one_click: info.one_click,
            });
        }

        let mailto = info.mailto.as_ref().ok_or_else(|| {
            CleanerError::ValidationError(format!(
                "{} has no unsubscribe information",
                sender_email
            ))
        })?;

        let (to, subject, body) = parser::split_mailto(mailto);
        let raw = build_unsubscribe_mail(
            &to,
            subject.as_deref().unwrap_or(DEFAULT_UNSUB_SUBJECT),
            body.as_deref().unwrap_or(DEFAULT_UNSUB_BODY),
        );

        self.client.send_message(&raw).await?;
        info!("Sent unsubscribe mail to {}", to);

        Ok(UnsubscribeOutcome::EmailSent { to })
    }
}

/// Resolve a selection to sender addresses, validating against the snapshot
fn resolve_selection(
    selection: &Selection,
    senders: &[Sender],
    classifications: &std::collections::HashMap<String, String>,
) -> Result<Vec<String>> {
    let known: HashSet<&str> = senders.iter().map(|s| s.email.as_str()).collect();

    let emails = match selection {
        Selection::Sender(email) => {
            if !known.contains(email.as_str()) {
                return Err(CleanerError::ValidationError(format!(
                    "Unknown sender: {}",
                    email
                )));
            }
            vec![email.clone()]
        }
        Selection::Category(category) => classifications
            .iter()
            .filter(|(_, c)| c.as_str() == category)
            .map(|(email, _)| email.clone())
            .collect(),
        Selection::Senders(emails) => {
            for email in emails {
                if !known.contains(email.as_str()) {
                    return Err(CleanerError::ValidationError(format!(
                        "Unknown sender: {}",
                        email
                    )));
                }
            }
            emails.clone()
        }
    };

    if emails.is_empty() {
        return Err(CleanerError::ValidationError(
            "Selection matches no senders".to_string(),
        ));
    }

    Ok(emails)
}

/// Assemble the raw RFC822 unsubscribe mail
fn build_unsubscribe_mail(to: &str, subject: &str, body: &str) -> String {
    [
        &format!("To: {}", to),
        &format!("Subject: {}", subject),
        "Content-Type: text/plain; charset=utf-8",
        "",
        body,
    ]
    .join("\r\n")
}
