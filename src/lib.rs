//! Inbox Cleaner
//!
//! Scans a Gmail mailbox, aggregates messages by sender, classifies senders
//! into a fixed category set, and applies bulk cleanup actions (trash,
//! archive, permanent delete, unsubscribe) from the resulting snapshot.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 with on-disk token caching
//! - **Scanning**: Paged listing plus concurrent metadata fetching, with
//!   cooperative cancellation at page and chunk boundaries
//! - **Classification**: Deterministic pattern rules, optionally fronted by
//!   an LLM classifier that falls back to patterns on any failure
//! - **Mutation**: Chunked batch operations with partial-failure accounting
//!   and snapshot bookkeeping
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use inbox_cleaner::{
//!     auth, client::GmailMailClient, config::Config, rate_limiter::RequestPacer,
//!     scanner::{CancelToken, ScanOptions, ScanOrchestrator}, store::JsonFileStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let (hub, authenticator) = auth::authenticate(
//!         &config.auth.credentials,
//!         &config.auth.token_cache,
//!         true,
//!     )
//!     .await?;
//!
//!     let pacer = RequestPacer::new(config.rate.requests_per_second);
//!     let client = Arc::new(GmailMailClient::new(hub, authenticator, pacer));
//!     let store = Arc::new(JsonFileStore::new(".inbox-cleaner/snapshot.json"));
//!
//!     let orchestrator = ScanOrchestrator::new(client, store, ScanOptions::default());
//!     let outcome = orchestrator.scan(&CancelToken::new(), None).await?;
//!     println!("{} senders found", outcome.sender_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail hub construction
//! - [`client`] - Paced Gmail API client with auth-expiry retry
//! - [`aggregator`] - Per-sender message aggregation
//! - [`classifier`] - Pattern and AI sender classification
//! - [`scanner`] - Scan orchestration
//! - [`mutator`] - Bulk mutation and unsubscribe
//! - [`store`] - Snapshot persistence
//! - [`parser`] - Header parsing (From, List-Unsubscribe, mailto)
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface
//! - [`error`] - Error types and result alias

pub mod aggregator;
pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod mutator;
pub mod parser;
pub mod rate_limiter;
pub mod scanner;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{CleanerError, Result};

pub use models::{
    MessageMetadata, MutateAction, MutationOutcome, ScanScope, Sender, Snapshot, UnsubscribeInfo,
};

pub use aggregator::SenderAggregator;
pub use classifier::{AiClassifier, CompletionProvider, PatternClassifier, CATEGORIES};
pub use client::{GmailMailClient, MailClient};
pub use config::Config;
pub use mutator::{BulkMutator, Selection, UnsubscribeOutcome};
pub use rate_limiter::RequestPacer;
pub use scanner::{CancelToken, ScanOptions, ScanOrchestrator, ScanOutcome};
pub use store::{JsonFileStore, SnapshotStore};

pub use cli::{Cli, Commands, ProgressReporter};
