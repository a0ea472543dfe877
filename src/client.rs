//! Gmail API client with request pacing and auth-expiry retry

use async_trait::async_trait;
use google_gmail1::api::{
    BatchDeleteMessagesRequest, BatchModifyMessagesRequest, Label, Message,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{GmailAuthenticator, GmailHub, REQUIRED_SCOPES};
use crate::error::{CleanerError, Result};
use crate::models::{ChunkError, MessageMetadata, MessagePage, MutateAction, MutationOutcome, Progress};
use crate::parser;
use crate::rate_limiter::RequestPacer;

/// Largest page the messages.list endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 500;

/// Messages per batchModify/batchDelete call
pub const MUTATE_CHUNK_SIZE: usize = 100;

/// Progress callback invoked after each completed chunk
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Label info returned from the Gmail API
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Mail API operations the pipeline needs, kept narrow for testing
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Fetch one page of message ids matching a query; the caller drives
    /// pagination via the returned token
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Fetch headers-only metadata for one message
    async fn get_message(&self, id: &str) -> Result<MessageMetadata>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its id
    async fn create_label(&self, name: &str) -> Result<String>;

    /// Delete a label by id
    async fn delete_label(&self, label_id: &str) -> Result<()>;

    /// Apply one mutation to a set of message ids in chunks
    ///
    /// A failing chunk is recorded and the remaining chunks still run, so
    /// the outcome always accounts for every id and `failed_ids` lists
    /// exactly the ids that did not mutate. An empty id list is a
    /// validation error.
    async fn batch_mutate(
        &self,
        ids: &[String],
        action: &MutateAction,
        on_progress: Option<ProgressCallback>,
    ) -> Result<MutationOutcome>;

    /// Send a raw RFC822 message (used for mailto unsubscribe)
    async fn send_message(&self, raw_rfc822: &str) -> Result<()>;

    /// Find a label by name or create it
    async fn get_or_create_label(&self, name: &str) -> Result<String> {
        let labels = self.list_labels().await?;
        if let Some(existing) = labels.iter().find(|l| l.name == name) {
            return Ok(existing.id.clone());
        }
        self.create_label(name).await
    }
}

/// Run a chunked mutation, accumulating per-chunk outcomes
///
/// Shared by every `MailClient` implementation so the partial-failure
/// accounting (and the meaning of `failed_ids`) is identical regardless of
/// chunk size. The per-chunk operation receives an owned chunk; its error
/// marks the whole chunk failed without aborting the rest.
pub async fn mutate_in_chunks<F, Fut>(
    ids: &[String],
    chunk_size: usize,
    on_progress: Option<ProgressCallback>,
    mut op: F,
) -> Result<MutationOutcome>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if ids.is_empty() {
        return Err(CleanerError::ValidationError(
            "No messages selected for mutation".to_string(),
        ));
    }

    let total = ids.len();
    let mut outcome = MutationOutcome::default();
    let mut processed = 0;

    for (chunk_index, chunk) in ids.chunks(chunk_size.max(1)).enumerate() {
        match op(chunk.to_vec()).await {
            Ok(()) => outcome.success += chunk.len(),
            Err(e) => {
                warn!(
                    "Chunk {} failed ({} messages): {}",
                    chunk_index,
                    chunk.len(),
                    e
                );
                outcome.failed += chunk.len();
                outcome.failed_ids.extend(chunk.iter().cloned());
                outcome.errors.push(ChunkError {
                    chunk: chunk_index,
                    message: e.to_string(),
                });
            }
        }

        processed += chunk.len();
        if let Some(cb) = on_progress.as_ref() {
            cb(Progress::new(processed, total));
        }
    }

    Ok(outcome)
}

/// Retry an operation exactly once after a forced token refresh
///
/// Only auth errors trigger the retry; a second auth failure propagates.
pub(crate) async fn with_auth_retry<T, F, Fut, R, RFut>(operation: F, refresh: R) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    match operation().await {
        Err(CleanerError::AuthError(msg)) => {
            warn!("Auth expired ({}), refreshing token and retrying once", msg);
            refresh().await?;
            operation().await
        }
        other => other,
    }
}

/// Production Gmail client
///
/// Every outbound call claims the shared pacer slot first, and any call
/// rejected with 401 gets one forced token refresh and one retry.
pub struct GmailMailClient {
    hub: GmailHub,
    authenticator: GmailAuthenticator,
    pacer: RequestPacer,
}

impl GmailMailClient {
    pub fn new(hub: GmailHub, authenticator: GmailAuthenticator, pacer: RequestPacer) -> Self {
        Self {
            hub,
            authenticator,
            pacer,
        }
    }

    async fn refresh_token(&self) -> Result<()> {
        self.authenticator
            .force_refreshed_token(REQUIRED_SCOPES)
            .await
            .map(|_| ())
            .map_err(|e| CleanerError::AuthError(format!("Token refresh failed: {}", e)))
    }

    /// Run one chunk of a batch mutation
    async fn mutate_chunk(&self, ids: Vec<String>, action: &MutateAction) -> Result<()> {
        with_auth_retry(
            || async {
                self.pacer.acquire().await;
                match action {
                    MutateAction::Trash => {
                        let request = BatchModifyMessagesRequest {
                            ids: Some(ids.clone()),
                            add_label_ids: Some(vec!["TRASH".to_string()]),
                            remove_label_ids: Some(vec!["INBOX".to_string()]),
                        };
                        self.hub
                            .users()
                            .messages_batch_modify(request, "me")
                            .add_scope("https://www.googleapis.com/auth/gmail.modify")
                            .doit()
                            .await?;
                    }
                    MutateAction::Archive => {
                        let request = BatchModifyMessagesRequest {
                            ids: Some(ids.clone()),
                            add_label_ids: None,
                            remove_label_ids: Some(vec!["INBOX".to_string()]),
                        };
                        self.hub
                            .users()
                            .messages_batch_modify(request, "me")
                            .add_scope("https://www.googleapis.com/auth/gmail.modify")
                            .doit()
                            .await?;
                    }
                    MutateAction::AddLabel(label_id) => {
                        let request = BatchModifyMessagesRequest {
                            ids: Some(ids.clone()),
                            add_label_ids: Some(vec![label_id.clone()]),
                            remove_label_ids: None,
                        };
                        self.hub
                            .users()
                            .messages_batch_modify(request, "me")
                            .add_scope("https://www.googleapis.com/auth/gmail.modify")
                            .doit()
                            .await?;
                    }
                    MutateAction::Delete => {
                        let request = BatchDeleteMessagesRequest {
                            ids: Some(ids.clone()),
                        };
                        self.hub
                            .users()
                            .messages_batch_delete(request, "me")
                            .add_scope("https://mail.google.com/")
                            .doit()
                            .await?;
                    }
                }
                Ok(())
            },
            || self.refresh_token(),
        )
        .await
    }
}

/// Parse a Gmail API Message into MessageMetadata
pub(crate) fn parse_message_metadata(msg: Message) -> Result<MessageMetadata> {
    let id = msg
        .id
        .ok_or_else(|| CleanerError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let thread_id = msg.thread_id.unwrap_or_else(|| id.clone());
    let label_ids = msg.label_ids.unwrap_or_default();

    let mut from = String::new();
    let mut subject = String::new();
    let mut date_str = String::new();
    let mut list_unsubscribe: Option<String> = None;
    let mut list_unsubscribe_post: Option<String> = None;

    if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
        for header in headers {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                match name.to_lowercase().as_str() {
                    "from" => from = value.clone(),
                    "subject" => subject = value.clone(),
                    "date" => date_str = value.clone(),
                    "list-unsubscribe" => list_unsubscribe = Some(value.clone()),
                    "list-unsubscribe-post" => list_unsubscribe_post = Some(value.clone()),
                    _ => {}
                }
            }
        }
    }

    let (sender_name, sender_email) = parser::parse_from_header(&from);
    let unsubscribe = parser::parse_unsubscribe(
        list_unsubscribe.as_deref(),
        list_unsubscribe_post.as_deref(),
    );
    let date = parser::parse_date_millis(&date_str);

    Ok(MessageMetadata {
        id,
        thread_id,
        from,
        sender_email,
        sender_name,
        subject,
        date,
        label_ids,
        unsubscribe,
    })
}

#[async_trait]
impl MailClient for GmailMailClient {
    async fn list_messages(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                let mut call = self
                    .hub
                    .users()
                    .messages_list("me")
                    .q(query)
                    .max_results(page_size);

                if let Some(token) = page_token {
                    call = call.page_token(token);
                }

                let (_, response) = call
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;

                let ids = response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id)
                    .collect::<Vec<_>>();

                debug!("Listed {} message ids for query '{}'", ids.len(), query);

                Ok(MessagePage {
                    ids,
                    next_page_token: response.next_page_token,
                    estimated_total: response.result_size_estimate.map(|n| n as u64),
                })
            },
            || self.refresh_token(),
        )
        .await
    }

    async fn get_message(&self, id: &str) -> Result<MessageMetadata> {
        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                let (_, msg) = self
                    .hub
                    .users()
                    .messages_get("me", id)
                    .format("metadata")
                    .add_metadata_headers("From")
                    .add_metadata_headers("Subject")
                    .add_metadata_headers("Date")
                    .add_metadata_headers("List-Unsubscribe")
                    .add_metadata_headers("List-Unsubscribe-Post")
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await?;

                parse_message_metadata(msg)
            },
            || self.refresh_token(),
        )
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                let (_, response) = self
                    .hub
                    .users()
                    .labels_list("me")
                    .add_scope("https://www.googleapis.com/auth/gmail.labels")
                    .doit()
                    .await?;

                Ok(response
                    .labels
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|label| match (label.id, label.name) {
                        (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                        _ => None,
                    })
                    .collect())
            },
            || self.refresh_token(),
        )
        .await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                let label = Label {
                    name: Some(name.to_string()),
                    message_list_visibility: Some("show".to_string()),
                    label_list_visibility: Some("labelShow".to_string()),
                    ..Default::default()
                };

                let (_, created) = self
                    .hub
                    .users()
                    .labels_create(label, "me")
                    .add_scope("https://www.googleapis.com/auth/gmail.labels")
                    .doit()
                    .await?;

                created
                    .id
                    .ok_or_else(|| CleanerError::LabelError("Created label has no ID".to_string()))
            },
            || self.refresh_token(),
        )
        .await
    }

    async fn delete_label(&self, label_id: &str) -> Result<()> {
        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                self.hub
                    .users()
                    .labels_delete("me", label_id)
                    .add_scope("https://www.googleapis.com/auth/gmail.labels")
                    .doit()
                    .await?;

                Ok(())
            },
            || self.refresh_token(),
        )
        .await
    }

    async fn batch_mutate(
        &self,
        ids: &[String],
        action: &MutateAction,
        on_progress: Option<ProgressCallback>,
    ) -> Result<MutationOutcome> {
        debug!("Running {} on {} messages", action.as_str(), ids.len());
        mutate_in_chunks(ids, MUTATE_CHUNK_SIZE, on_progress, |chunk| {
            self.mutate_chunk(chunk, action)
        })
        .await
    }

    async fn send_message(&self, raw_rfc822: &str) -> Result<()> {
        let bytes = raw_rfc822.as_bytes().to_vec();

        with_auth_retry(
            || async {
                self.pacer.acquire().await;

                let mime_type: mime::Mime = "message/rfc822".parse().map_err(|_| {
                    CleanerError::InvalidMessageFormat("Bad MIME type".to_string())
                })?;

                self.hub
                    .users()
                    .messages_send(Message::default(), "me")
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .upload(std::io::Cursor::new(bytes.clone()), mime_type)
                    .await?;

                Ok(())
            },
            || self.refresh_token(),
        )
        .await
    }
}
