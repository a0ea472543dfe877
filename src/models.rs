//! Core data structures shared across the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unsubscribe targets extracted from List-Unsubscribe headers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeInfo {
    /// mailto: target, including any ?subject=...&body=... params
    pub mailto: Option<String>,
    /// http(s) unsubscribe URL
    pub http_url: Option<String>,
    /// RFC 8058 one-click support advertised via List-Unsubscribe-Post
    #[serde(default)]
    pub one_click: bool,
}

/// Metadata for a single message, fetched with format=metadata (headers only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub id: String,
    pub thread_id: String,
    /// Raw From header value
    pub from: String,
    /// Normalized (lowercased) address extracted from the From header
    pub sender_email: String,
    /// Display name from the From header, falls back to the address
    pub sender_name: String,
    pub subject: String,
    /// Date header as epoch milliseconds, 0 when unparseable
    pub date: i64,
    pub label_ids: Vec<String>,
    pub unsubscribe: Option<UnsubscribeInfo>,
}

/// One page of message ids from a list call
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
    pub estimated_total: Option<u64>,
}

/// Aggregated view of one sender across all scanned messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    /// Normalized (lowercased) sender address, the aggregation key
    pub email: String,
    /// Display name from the first message seen
    pub name: String,
    /// Number of messages from this sender
    pub count: usize,
    pub message_ids: Vec<String>,
    /// Most recent Date header across messages, epoch milliseconds
    pub last_email_date: i64,
    /// First parseable unsubscribe info seen, never overwritten
    pub unsubscribe: Option<UnsubscribeInfo>,
}

/// Bulk mutation requested against a set of message ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutateAction {
    /// Add TRASH, remove INBOX (reversible for ~30 days)
    Trash,
    /// Permanent batch delete
    Delete,
    /// Remove INBOX only
    Archive,
    /// Apply a label by id (category sorting)
    AddLabel(String),
}

impl MutateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutateAction::Trash => "trash",
            MutateAction::Delete => "delete",
            MutateAction::Archive => "archive",
            MutateAction::AddLabel(_) => "label",
        }
    }
}

/// Which part of the mailbox a scan covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanScope {
    Inbox,
    AllMail,
}

impl ScanScope {
    /// Gmail search query for this scope
    pub fn query(&self) -> &'static str {
        match self {
            ScanScope::Inbox => "in:inbox",
            ScanScope::AllMail => "-in:trash -in:spam",
        }
    }
}

/// Error recorded for one failed chunk of a batch mutation
#[derive(Debug, Clone)]
pub struct ChunkError {
    /// Zero-based chunk index within the mutation
    pub chunk: usize,
    pub message: String,
}

/// Outcome of a chunked batch mutation
///
/// A failing chunk never aborts the remaining chunks, so
/// `success + failed` always equals the number of ids submitted.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub success: usize,
    pub failed: usize,
    /// Every id belonging to a failed chunk, regardless of chunk size
    pub failed_ids: Vec<String>,
    pub errors: Vec<ChunkError>,
}

/// Progress snapshot reported after each chunk/batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            ((processed as f64 / total as f64) * 100.0).round() as u8
        } else {
            0
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}

/// Persisted result of a completed scan
///
/// Only written when a scan runs to completion; a failed or cancelled
/// scan leaves the previous snapshot untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Senders sorted by message count, descending
    pub senders: Vec<Sender>,
    /// sender email -> category name
    pub classifications: HashMap<String, String>,
    /// Distinct live categories, "People" first then alphabetical
    pub categories: Vec<String>,
    pub last_scan: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn sender(&self, email: &str) -> Option<&Sender> {
        self.senders.iter().find(|s| s.email == email)
    }
}
