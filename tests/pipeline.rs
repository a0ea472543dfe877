//! End-to-end pipeline tests against an in-memory mail client

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use inbox_cleaner::classifier::CompletionProvider;
use inbox_cleaner::client::{
    mutate_in_chunks, LabelInfo, MailClient, ProgressCallback, MUTATE_CHUNK_SIZE,
};
use inbox_cleaner::error::{CleanerError, Result};
use inbox_cleaner::models::{
    MessageMetadata, MessagePage, MutateAction, MutationOutcome, ScanScope, Snapshot,
    UnsubscribeInfo,
};
use inbox_cleaner::mutator::{BulkMutator, Selection, UnsubscribeOutcome};
use inbox_cleaner::scanner::{
    CancelToken, ScanOptions, ScanOrchestrator, ScanPhase, ScanProgressCallback,
};
use inbox_cleaner::store::{JsonFileStore, SnapshotStore};
use inbox_cleaner::Sender;

/// Scripted in-memory mail client
#[derive(Default)]
struct FakeMailClient {
    /// Pages returned in order by list_messages
    pages: Vec<Vec<String>>,
    messages: HashMap<String, MessageMetadata>,
    /// Chunk indices whose batch mutation fails
    failing_chunks: HashSet<usize>,
    /// Cancel this token after serving the first page
    cancel_after_first_page: Option<CancelToken>,
    /// Delay inside list_messages, for concurrency tests
    list_delay: Option<Duration>,
    mutated_ids: Mutex<Vec<String>>,
    /// Actions passed to batch_mutate, in call order
    actions: Mutex<Vec<MutateAction>>,
    created_labels: Mutex<Vec<String>>,
    sent_mail: Mutex<Vec<String>>,
}

fn meta(id: &str, email: &str, name: &str, labels: &[&str]) -> MessageMetadata {
    MessageMetadata {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        from: format!("{} <{}>", name, email),
        sender_email: email.to_string(),
        sender_name: name.to_string(),
        subject: "hello".to_string(),
        date: 1_700_000_000_000,
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        unsubscribe: None,
    }
}

impl FakeMailClient {
    fn with_messages(pages: Vec<Vec<&str>>, messages: Vec<MessageMetadata>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|p| p.into_iter().map(String::from).collect())
                .collect(),
            messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MailClient for FakeMailClient {
    async fn list_messages(
        &self,
        _query: &str,
        _page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }

        let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let ids = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };

        if index == 0 {
            if let Some(token) = &self.cancel_after_first_page {
                token.cancel();
            }
        }

        Ok(MessagePage {
            ids,
            next_page_token,
            estimated_total: None,
        })
    }

    async fn get_message(&self, id: &str) -> Result<MessageMetadata> {
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| CleanerError::NotFound(id.to_string()))
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(Vec::new())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.created_labels.lock().unwrap().push(name.to_string());
        Ok(format!("Label_{}", name))
    }

    async fn delete_label(&self, _label_id: &str) -> Result<()> {
        Ok(())
    }

    async fn batch_mutate(
        &self,
        ids: &[String],
        action: &MutateAction,
        on_progress: Option<ProgressCallback>,
    ) -> Result<MutationOutcome> {
        self.actions.lock().unwrap().push(action.clone());

        // Same chunk driver as the real client; only the per-chunk
        // operation is scripted
        let mut chunk_index = 0;
        mutate_in_chunks(ids, MUTATE_CHUNK_SIZE, on_progress, |chunk| {
            let fail = self.failing_chunks.contains(&chunk_index);
            chunk_index += 1;
            async move {
                if fail {
                    Err(CleanerError::ServerError {
                        status: 500,
                        message: "injected failure".to_string(),
                    })
                } else {
                    self.mutated_ids.lock().unwrap().extend(chunk);
                    Ok(())
                }
            }
        })
        .await
    }

    async fn send_message(&self, raw_rfc822: &str) -> Result<()> {
        self.sent_mail.lock().unwrap().push(raw_rfc822.to_string());
        Ok(())
    }
}

/// Provider that always fails, to exercise the pattern fallback
struct BrokenProvider;

#[async_trait]
impl CompletionProvider for BrokenProvider {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(CleanerError::ApiError("provider down".to_string()))
    }
}

/// Provider that classifies every sender in the prompt as Newsletters
struct NewsletterProvider;

#[async_trait]
impl CompletionProvider for NewsletterProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let count = prompt.lines().filter(|l| l.contains(" <")).count();
        let body = (1..=count)
            .map(|i| format!("\"{}\": \"Newsletters\"", i))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("{{{}}}", body))
    }
}

fn store_in(dir: &tempfile::TempDir) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::new(dir.path().join("snapshot.json")))
}

fn options() -> ScanOptions {
    ScanOptions {
        scope: ScanScope::Inbox,
        page_size: 100,
        chunk_size: 10,
        max_messages: 2000,
        ai_batch_size: 50,
        ai_batch_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn full_scan_persists_classified_snapshot() {
    let client = Arc::new(FakeMailClient::with_messages(
        vec![vec!["m1", "m2", "m3"], vec!["m4", "m5"]],
        vec![
            meta("m1", "digest@example.com", "Daily Digest", &["INBOX"]),
            meta("m2", "digest@example.com", "Daily Digest", &["INBOX"]),
            meta("m3", "alice@example.com", "Alice", &["INBOX"]),
            // Sent mail is skipped
            meta("m4", "me@example.com", "Me", &["SENT"]),
            // Already organized under a user label
            meta("m5", "sorted@example.com", "Sorted", &["INBOX", "Label_1"]),
        ],
    ));

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    let orchestrator = ScanOrchestrator::new(client, store.clone(), options());

    let outcome = orchestrator.scan(&CancelToken::new(), None).await.unwrap();

    assert_eq!(outcome.messages_scanned, 5);
    assert_eq!(outcome.sender_count, 2);
    assert_eq!(outcome.skipped_sent, 1);
    assert_eq!(outcome.skipped_labeled, 1);
    assert!(!outcome.ai_classified);

    let snapshot = store.load().await.unwrap().unwrap();
    // Sorted by count descending
    assert_eq!(snapshot.senders[0].email, "digest@example.com");
    assert_eq!(snapshot.senders[0].count, 2);
    assert_eq!(snapshot.classifications["digest@example.com"], "Newsletters");
    assert_eq!(snapshot.classifications["alice@example.com"], "People");
    // People sorts first in the category list
    assert_eq!(snapshot.categories, vec!["People", "Newsletters"]);
    assert!(snapshot.last_scan.is_some());
}

#[tokio::test]
async fn cancelled_scan_leaves_no_snapshot() {
    let cancel = CancelToken::new();
    let mut client = FakeMailClient::with_messages(
        vec![vec!["m1"], vec!["m2"]],
        vec![
            meta("m1", "a@example.com", "A", &["INBOX"]),
            meta("m2", "b@example.com", "B", &["INBOX"]),
        ],
    );
    client.cancel_after_first_page = Some(cancel.clone());

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    let orchestrator = ScanOrchestrator::new(Arc::new(client), store.clone(), options());

    let result = orchestrator.scan(&cancel, None).await;
    assert!(matches!(result, Err(CleanerError::Cancelled(_))));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn second_concurrent_scan_is_rejected() {
    let mut client = FakeMailClient::with_messages(
        vec![vec!["m1"]],
        vec![meta("m1", "a@example.com", "A", &["INBOX"])],
    );
    client.list_delay = Some(Duration::from_millis(100));

    let dir = tempfile::TempDir::new().unwrap();
    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::new(client),
        store_in(&dir),
        options(),
    ));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.scan(&CancelToken::new(), None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = orchestrator.scan(&CancelToken::new(), None).await;
    assert!(matches!(second, Err(CleanerError::StateError(_))));

    // The first scan still completes normally
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn failed_ai_classification_falls_back_to_patterns() {
    let messages = vec![
        meta("m1", "digest@example.com", "Daily Digest", &["INBOX"]),
        meta("m2", "alice@example.com", "Alice", &["INBOX"]),
    ];

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    let orchestrator = ScanOrchestrator::new(
        Arc::new(FakeMailClient::with_messages(vec![vec!["m1", "m2"]], messages)),
        store.clone(),
        options(),
    )
    .with_provider(Arc::new(BrokenProvider));

    let outcome = orchestrator.scan(&CancelToken::new(), None).await.unwrap();
    assert!(!outcome.ai_classified);

    let snapshot = store.load().await.unwrap().unwrap();
    assert_eq!(snapshot.classifications["digest@example.com"], "Newsletters");
    assert_eq!(snapshot.classifications["alice@example.com"], "People");
}

#[tokio::test]
async fn ai_classification_reports_batch_progress() {
    let client = Arc::new(FakeMailClient::with_messages(
        vec![vec!["m1", "m2", "m3"]],
        vec![
            meta("m1", "a@example.com", "A", &["INBOX"]),
            meta("m2", "b@example.com", "B", &["INBOX"]),
            meta("m3", "c@example.com", "C", &["INBOX"]),
        ],
    ));

    let dir = tempfile::TempDir::new().unwrap();
    let mut opts = options();
    opts.ai_batch_size = 1;
    let orchestrator = ScanOrchestrator::new(client, store_in(&dir), opts)
        .with_provider(Arc::new(NewsletterProvider));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = Arc::clone(&seen);
    let cb: ScanProgressCallback = Arc::new(move |p| {
        if p.phase == ScanPhase::Classifying {
            seen_cb.lock().unwrap().push((p.processed, p.total));
        }
    });

    let outcome = orchestrator
        .scan(&CancelToken::new(), Some(cb))
        .await
        .unwrap();
    assert!(outcome.ai_classified);

    // Each single-sender batch surfaces through the scan callback
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&(1, 3)));
    assert!(seen.contains(&(2, 3)));
    assert!(seen.contains(&(3, 3)));
}

#[tokio::test]
async fn scan_respects_max_messages_cap() {
    let messages: Vec<MessageMetadata> = (0..30)
        .map(|i| {
            meta(
                &format!("m{}", i),
                &format!("s{}@example.com", i),
                "S",
                &["INBOX"],
            )
        })
        .collect();
    let pages: Vec<Vec<String>> = messages
        .chunks(10)
        .map(|c| c.iter().map(|m| m.id.clone()).collect())
        .collect();

    let client = FakeMailClient {
        pages,
        messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
        ..Default::default()
    };

    let dir = tempfile::TempDir::new().unwrap();
    let mut opts = options();
    opts.max_messages = 15;
    let orchestrator = ScanOrchestrator::new(Arc::new(client), store_in(&dir), opts);

    let outcome = orchestrator
        .scan(&CancelToken::new(), None)
        .await
        .unwrap();
    assert_eq!(outcome.messages_scanned, 15);
}

fn snapshot_sender(email: &str, ids: Vec<String>) -> Sender {
    Sender {
        email: email.to_string(),
        name: email.to_string(),
        count: ids.len(),
        message_ids: ids,
        last_email_date: 0,
        unsubscribe: None,
    }
}

async fn seed_snapshot(store: &dyn SnapshotStore, senders: Vec<Sender>, categories: &[(&str, &str)]) {
    let classifications: HashMap<String, String> = categories
        .iter()
        .map(|(email, cat)| (email.to_string(), cat.to_string()))
        .collect();
    let category_list = inbox_cleaner::classifier::derive_categories(&classifications);
    store
        .save(&Snapshot {
            senders,
            classifications,
            categories: category_list,
            last_scan: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn partial_chunk_failure_retains_affected_senders() {
    // 250 messages from one sender: chunks 0 and 2 succeed, chunk 1 fails
    let ids: Vec<String> = (0..250).map(|i| format!("m{}", i)).collect();

    let client = Arc::new(FakeMailClient {
        failing_chunks: HashSet::from([1]),
        ..Default::default()
    });

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    seed_snapshot(
        &*store,
        vec![
            snapshot_sender("bulk@example.com", ids),
            snapshot_sender("alice@example.com", vec!["x1".to_string()]),
        ],
        &[
            ("bulk@example.com", "Newsletters"),
            ("alice@example.com", "People"),
        ],
    )
    .await;

    let mutator = BulkMutator::new(client, store.clone());
    let report = mutator
        .execute(
            &Selection::Sender("bulk@example.com".to_string()),
            &MutateAction::Trash,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.outcome.success, 150);
    assert_eq!(report.outcome.failed, 100);
    // The outcome names exactly the ids that did not mutate
    assert_eq!(report.outcome.failed_ids.len(), 100);
    assert!(report.outcome.failed_ids.contains(&"m100".to_string()));
    assert!(report.outcome.failed_ids.contains(&"m199".to_string()));
    assert_eq!(report.senders_removed, 0);
    assert_eq!(report.senders_retained, 1);

    // The sender stays listed so a retry can pick it up
    let snapshot = store.load().await.unwrap().unwrap();
    assert!(snapshot.sender("bulk@example.com").is_some());
    assert!(snapshot.sender("alice@example.com").is_some());
}

#[tokio::test]
async fn category_deletion_removes_senders_and_recomputes_categories() {
    let client = Arc::new(FakeMailClient::default());

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    seed_snapshot(
        &*store,
        vec![
            snapshot_sender("n1@example.com", vec!["a".to_string()]),
            snapshot_sender("n2@example.com", vec!["b".to_string()]),
            snapshot_sender("alice@example.com", vec!["c".to_string()]),
            snapshot_sender("shop@example.com", vec!["d".to_string()]),
        ],
        &[
            ("n1@example.com", "Newsletters"),
            ("n2@example.com", "Newsletters"),
            ("alice@example.com", "People"),
            ("shop@example.com", "Shopping"),
        ],
    )
    .await;

    let mutator = BulkMutator::new(client.clone(), store.clone());
    let report = mutator
        .execute(
            &Selection::Category("Newsletters".to_string()),
            &MutateAction::Archive,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.outcome.success, 2);
    assert_eq!(report.senders_removed, 2);

    let snapshot = store.load().await.unwrap().unwrap();
    assert!(snapshot.sender("n1@example.com").is_none());
    assert!(snapshot.sender("n2@example.com").is_none());
    assert!(!snapshot.classifications.contains_key("n1@example.com"));
    // Newsletters disappears from the category list; People still sorts first
    assert_eq!(snapshot.categories, vec!["People", "Shopping"]);

    let mutated = client.mutated_ids.lock().unwrap();
    assert_eq!(mutated.len(), 2);
}

#[tokio::test]
async fn sort_applies_category_labels() {
    let client = Arc::new(FakeMailClient::default());
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    seed_snapshot(
        &*store,
        vec![
            snapshot_sender("n1@example.com", vec!["a".to_string(), "b".to_string()]),
            snapshot_sender("alice@example.com", vec!["c".to_string()]),
        ],
        &[
            ("n1@example.com", "Newsletters"),
            ("alice@example.com", "People"),
        ],
    )
    .await;

    let mutator = BulkMutator::new(client.clone(), store.clone());
    let report = mutator
        .sort(
            &Selection::Senders(vec![
                "n1@example.com".to_string(),
                "alice@example.com".to_string(),
            ]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.outcome.success, 3);
    assert_eq!(report.outcome.failed, 0);
    // Categories process in a stable alphabetical order
    assert_eq!(report.labels, vec!["Newsletters", "People"]);
    assert_eq!(
        *client.created_labels.lock().unwrap(),
        vec!["Newsletters", "People"]
    );
    assert_eq!(
        *client.actions.lock().unwrap(),
        vec![
            MutateAction::AddLabel("Label_Newsletters".to_string()),
            MutateAction::AddLabel("Label_People".to_string()),
        ]
    );

    // Sorting never rewrites the snapshot
    let snapshot = store.load().await.unwrap().unwrap();
    assert!(snapshot.sender("n1@example.com").is_some());
    assert!(snapshot.sender("alice@example.com").is_some());
}

#[tokio::test]
async fn cleanup_trashes_messages_matching_age_query() {
    let client = Arc::new(FakeMailClient::with_messages(
        vec![vec!["o1", "o2"], vec!["o3"]],
        vec![],
    ));
    let dir = tempfile::TempDir::new().unwrap();
    let mutator = BulkMutator::new(client.clone(), store_in(&dir));

    let outcome = mutator
        .cleanup(&inbox_cleaner::mutator::older_than_query(90), 2000, None)
        .await
        .unwrap();

    assert_eq!(outcome.success, 3);
    assert_eq!(outcome.failed, 0);
    assert_eq!(*client.mutated_ids.lock().unwrap(), vec!["o1", "o2", "o3"]);
    assert_eq!(*client.actions.lock().unwrap(), vec![MutateAction::Trash]);
}

#[tokio::test]
async fn cleanup_with_no_matches_is_a_no_op() {
    let client = Arc::new(FakeMailClient::default());
    let dir = tempfile::TempDir::new().unwrap();
    let mutator = BulkMutator::new(client.clone(), store_in(&dir));

    let outcome = mutator.cleanup("older_than:90d", 2000, None).await.unwrap();

    assert_eq!(outcome.success, 0);
    assert_eq!(outcome.failed, 0);
    assert!(client.actions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delete_unknown_sender_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    seed_snapshot(
        &*store,
        vec![snapshot_sender("a@example.com", vec!["m".to_string()])],
        &[("a@example.com", "People")],
    )
    .await;

    let mutator = BulkMutator::new(Arc::new(FakeMailClient::default()), store);
    let result = mutator
        .execute(
            &Selection::Sender("ghost@example.com".to_string()),
            &MutateAction::Trash,
            None,
        )
        .await;
    assert!(matches!(result, Err(CleanerError::ValidationError(_))));
}

#[tokio::test]
async fn unsubscribe_prefers_http_url() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);

    let mut sender = snapshot_sender("news@example.com", vec!["m".to_string()]);
    sender.unsubscribe = Some(UnsubscribeInfo {
        mailto: Some("leave@example.com".to_string()),
        http_url: Some("https://example.com/unsub".to_string()),
        one_click: true,
    });
    seed_snapshot(&*store, vec![sender], &[("news@example.com", "Newsletters")]).await;

    let client = Arc::new(FakeMailClient::default());
    let mutator = BulkMutator::new(client.clone(), store);

    let outcome = mutator.unsubscribe("news@example.com").await.unwrap();
    assert_eq!(
        outcome,
        UnsubscribeOutcome::OpenUrl {
            url: "https://example.com/unsub".to_string(),
            one_click: true,
        }
    );
    // No mail goes out when an HTTP target exists
    assert!(client.sent_mail.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unsubscribe_sends_mailto_fallback() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);

    let mut sender = snapshot_sender("news@example.com", vec!["m".to_string()]);
    sender.unsubscribe = Some(UnsubscribeInfo {
        mailto: Some("leave@example.com?subject=Remove%20me".to_string()),
        http_url: None,
        one_click: false,
    });
    seed_snapshot(&*store, vec![sender], &[("news@example.com", "Newsletters")]).await;

    let client = Arc::new(FakeMailClient::default());
    let mutator = BulkMutator::new(client.clone(), store);

    let outcome = mutator.unsubscribe("news@example.com").await.unwrap();
    assert_eq!(
        outcome,
        UnsubscribeOutcome::EmailSent {
            to: "leave@example.com".to_string(),
        }
    );

    let sent = client.sent_mail.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("To: leave@example.com\r\n"));
    assert!(sent[0].contains("Subject: Remove me\r\n"));
    assert!(sent[0].contains("Content-Type: text/plain; charset=utf-8\r\n"));
    // Default body applies when the mailto carries none
    assert!(sent[0].ends_with("Please unsubscribe me from this mailing list."));
}

#[tokio::test]
async fn unsubscribe_without_info_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = store_in(&dir);
    seed_snapshot(
        &*store,
        vec![snapshot_sender("plain@example.com", vec!["m".to_string()])],
        &[("plain@example.com", "People")],
    )
    .await;

    let mutator = BulkMutator::new(Arc::new(FakeMailClient::default()), store);
    let result = mutator.unsubscribe("plain@example.com").await;
    assert!(matches!(result, Err(CleanerError::ValidationError(_))));
}
