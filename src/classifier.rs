//! Sender classification: deterministic pattern rules plus an optional
//! LLM-backed classifier with full fallback

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::ProgressCallback;
use crate::error::{CleanerError, Result};
use crate::models::{Progress, Sender};

/// The closed category set. Classifier output never leaves this list;
/// anything unrecognized collapses to "Other".
pub const CATEGORIES: [&str; 11] = [
    "People",
    "Newsletters",
    "Shopping",
    "Social Media",
    "Finance",
    "Travel",
    "Food",
    "Entertainment",
    "Work",
    "Notifications",
    "Other",
];

/// Senders per LLM request
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Pause between LLM batches to stay friendly with provider rate limits
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

/// The classifier's view of a sender
#[derive(Debug, Clone)]
pub struct SenderProfile {
    pub email: String,
    pub name: String,
    pub has_unsubscribe: bool,
}

impl From<&Sender> for SenderProfile {
    fn from(sender: &Sender) -> Self {
        Self {
            email: sender.email.clone(),
            name: sender.name.clone(),
            has_unsubscribe: sender.unsubscribe.is_some(),
        }
    }
}

struct PatternRules {
    social_domains: Regex,
    shopping_domains: Regex,
    shopping_local: Regex,
    food_domains: Regex,
    finance_domains: Regex,
    finance_local: Regex,
    travel_domains: Regex,
    entertainment_domains: Regex,
    work_domains: Regex,
    newsletter_local: Regex,
    newsletter_domains: Regex,
    notification_local: Regex,
    generic_local: Regex,
}

static RULES: Lazy<PatternRules> = Lazy::new(|| PatternRules {
    social_domains: Regex::new(
        r"@(facebook|linkedin|twitter|instagram|tiktok|pinterest|snapchat|youtube|reddit|facebookmail|linkedinmail|twittermail)\.|@x\.com",
    )
    .unwrap(),

    shopping_domains: Regex::new(
        r"@(amazon|ebay|etsy|walmart|target|bestbuy|costco|wayfair|zappos|macys|nordstrom|shopify|aliexpress)\.",
    )
    .unwrap(),
    shopping_local: Regex::new(r"orders?@|receipt@|shipping@|confirmation@|store@").unwrap(),

    food_domains: Regex::new(
        r"@(doordash|grubhub|ubereats|postmates|instacart|seamless|caviar|starbucks|chipotle|mcdonalds)\.",
    )
    .unwrap(),

    finance_domains: Regex::new(
        r"@(paypal|venmo|cashapp|chase|bankofamerica|wellsfargo|citi|amex|capitalone|mint|robinhood|coinbase|stripe)\.",
    )
    .unwrap(),
    finance_local: Regex::new(r"statement@|alerts?@.*bank|billing@|invoice@").unwrap(),

    travel_domains: Regex::new(
        r"@(airbnb|booking|expedia|kayak|hotels|tripadvisor|southwest|united|delta|american|jetblue|marriott|hilton)\.",
    )
    .unwrap(),

    entertainment_domains: Regex::new(
        r"@(spotify|netflix|hulu|disney|hbo|peacock|paramount|twitch|steam|apple|youtube)\.",
    )
    .unwrap(),

    work_domains: Regex::new(
        r"@(slack|zoom|notion|figma|asana|trello|monday|jira|confluence|github|gitlab|atlassian|dropbox|google)\.",
    )
    .unwrap(),

    newsletter_local: Regex::new(r"newsletter@|digest@|updates?@|weekly@|daily@|news@").unwrap(),
    newsletter_domains: Regex::new(
        r"@(substack|mailchimp|constantcontact|sendgrid|hubspot|beehiiv)\.",
    )
    .unwrap(),

    notification_local: Regex::new(
        r"noreply@|no-reply@|donotreply@|notifications?@|alerts?@|mailer@|automated@",
    )
    .unwrap(),
    generic_local: Regex::new(r"^(info|hello|support|help|team|admin|contact)@").unwrap(),
});

/// Deterministic rule-based classifier
///
/// Rules run in a fixed order and the first match wins. Specific brand
/// domains come before the broad unsubscribe-based Newsletters rule, which
/// comes before the generic Notifications rule; an Amazon mail with an
/// unsubscribe header is Shopping, not Newsletters. The final fallback is
/// "People", so classification is total.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one sender; always returns a category from [`CATEGORIES`]
    pub fn classify(&self, sender: &SenderProfile) -> &'static str {
        let email = sender.email.to_lowercase();
        let rules = &*RULES;

        if rules.social_domains.is_match(&email) {
            return "Social Media";
        }
        if rules.shopping_domains.is_match(&email) || rules.shopping_local.is_match(&email) {
            return "Shopping";
        }
        if rules.food_domains.is_match(&email) {
            return "Food";
        }
        if rules.finance_domains.is_match(&email) || rules.finance_local.is_match(&email) {
            return "Finance";
        }
        if rules.travel_domains.is_match(&email) {
            return "Travel";
        }
        if rules.entertainment_domains.is_match(&email) {
            return "Entertainment";
        }
        if rules.work_domains.is_match(&email) {
            return "Work";
        }
        if sender.has_unsubscribe
            || rules.newsletter_local.is_match(&email)
            || rules.newsletter_domains.is_match(&email)
        {
            return "Newsletters";
        }
        if rules.notification_local.is_match(&email) || rules.generic_local.is_match(&email) {
            return "Notifications";
        }

        "People"
    }

    /// Classify a whole sender set
    pub fn classify_all(&self, senders: &[SenderProfile]) -> HashMap<String, String> {
        senders
            .iter()
            .map(|s| (s.email.clone(), self.classify(s).to_string()))
            .collect()
    }
}

/// Text completion backend for the AI classifier
///
/// One prompt in, one text response out. The classifier owns batching,
/// prompt construction, and response parsing; the provider owns transport.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// LLM-backed classifier
///
/// Splits senders into batches, sends one numbered prompt per batch, and
/// expects a JSON object mapping batch ordinals to category names. Any
/// batch failure fails the whole call; the orchestrator then reclassifies
/// the entire set with [`PatternClassifier`] so results are never mixed.
pub struct AiClassifier {
    provider: Arc<dyn CompletionProvider>,
    batch_size: usize,
    batch_delay: Duration,
}

impl AiClassifier {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }

    pub fn with_batching(mut self, batch_size: usize, batch_delay: Duration) -> Self {
        self.batch_size = batch_size.clamp(1, 100);
        self.batch_delay = batch_delay;
        self
    }

    /// Classify all senders, reporting progress after each batch
    pub async fn classify_all(
        &self,
        senders: &[SenderProfile],
        on_progress: Option<ProgressCallback>,
    ) -> Result<HashMap<String, String>> {
        let mut results = HashMap::with_capacity(senders.len());
        let total = senders.len();
        let batch_count = senders.chunks(self.batch_size).len();

        for (batch_index, batch) in senders.chunks(self.batch_size).enumerate() {
            debug!(
                "Classifying batch {}/{} ({} senders)",
                batch_index + 1,
                batch_count,
                batch.len()
            );

            let prompt = build_prompt(batch);
            let response = self.provider.complete(&prompt).await?;
            let batch_results = parse_batch_response(&response, batch)?;
            results.extend(batch_results);

            if let Some(cb) = on_progress.as_ref() {
                cb(Progress::new(results.len(), total));
            }

            // Fixed pause between provider calls
            if (batch_index + 1) * self.batch_size < total {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        info!("AI classified {} senders", results.len());
        Ok(results)
    }
}

/// Build the numbered classification prompt for one batch
fn build_prompt(batch: &[SenderProfile]) -> String {
    let sender_list = batch
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. \"{}\" <{}>", i + 1, s.name, s.email))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Classify email senders into EXACTLY these categories. Use ONLY these exact names:

ALLOWED CATEGORIES (use exactly as written):
- "People" - Real individual humans only (friends, family, coworkers with personal names)
- "Newsletters" - Newsletters, digests, subscriptions, mailing lists
- "Shopping" - Stores, e-commerce, order confirmations, shipping
- "Social Media" - Facebook, Twitter, LinkedIn, Instagram, TikTok, etc.
- "Finance" - Banks, payments, investments, billing
- "Travel" - Airlines, hotels, booking sites
- "Food" - Restaurants, delivery apps, food services
- "Entertainment" - Streaming, gaming, music, media
- "Work" - Professional tools, SaaS, productivity apps
- "Notifications" - Automated alerts, system emails, no-reply addresses
- "Other" - Anything that doesn't fit above

RULES:
1. Use EXACT category names from the list - no variations
2. "People" = individual humans with real names (John Smith, Sarah Jones)
3. Companies/brands are NEVER "People" even if friendly-sounding
4. When unsure, use "Notifications" for automated or "Other" for unclear

Senders:
{sender_list}

Return ONLY valid JSON: {{"1": "Category", "2": "Category", ...}}"#
    )
}

/// Parse a provider response for one batch
///
/// Tolerates prose around the JSON object by slicing from the first `{{` to
/// the last `}}`. A missing object or invalid JSON is a parse error (the
/// caller falls back to patterns); a missing ordinal or an off-list
/// category quietly becomes "Other".
fn parse_batch_response(
    response: &str,
    batch: &[SenderProfile],
) -> Result<HashMap<String, String>> {
    let start = response.find('{').ok_or_else(|| {
        CleanerError::ClassificationParseError("No JSON object in response".to_string())
    })?;
    let end = response.rfind('}').ok_or_else(|| {
        CleanerError::ClassificationParseError("No JSON object in response".to_string())
    })?;
    if end < start {
        return Err(CleanerError::ClassificationParseError(
            "Malformed JSON span in response".to_string(),
        ));
    }

    let by_ordinal: HashMap<String, String> = serde_json::from_str(&response[start..=end])
        .map_err(|e| {
            CleanerError::ClassificationParseError(format!("Invalid JSON in response: {}", e))
        })?;

    let mut results = HashMap::with_capacity(batch.len());
    for (i, sender) in batch.iter().enumerate() {
        let ordinal = (i + 1).to_string();
        let category = by_ordinal
            .get(&ordinal)
            .map(String::as_str)
            .filter(|c| CATEGORIES.contains(c))
            .unwrap_or("Other");
        results.insert(sender.email.clone(), category.to_string());
    }

    Ok(results)
}

/// Derive the live category list from classification values
///
/// "People" always sorts first when present; the rest are alphabetical.
pub fn derive_categories(classifications: &HashMap<String, String>) -> Vec<String> {
    let mut categories: Vec<String> = classifications
        .values()
        .cloned()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    categories.sort_by(|a, b| match (a.as_str(), b.as_str()) {
        ("People", "People") => std::cmp::Ordering::Equal,
        ("People", _) => std::cmp::Ordering::Less,
        (_, "People") => std::cmp::Ordering::Greater,
        _ => a.cmp(b),
    });

    categories
}

/// OpenAI-backed completion provider
#[cfg(feature = "ml")]
pub mod openai {
    use async_openai::{
        config::OpenAIConfig,
        types::{
            ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        },
        Client,
    };
    use async_trait::async_trait;

    use super::CompletionProvider;
    use crate::error::{CleanerError, Result};

    pub struct OpenAiProvider {
        client: Client<OpenAIConfig>,
        model: String,
    }

    impl OpenAiProvider {
        /// Uses OPENAI_API_KEY from the environment
        pub fn new(model: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                model: model.into(),
            }
        }

        fn build_request(&self, prompt: &str) -> Result<CreateChatCompletionRequest> {
            let message = ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| CleanerError::ApiError(e.to_string()))?;

            CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages([ChatCompletionRequestMessage::User(message)])
                .build()
                .map_err(|e| CleanerError::ApiError(e.to_string()))
        }
    }

    #[async_trait]
    impl CompletionProvider for OpenAiProvider {
        async fn complete(&self, prompt: &str) -> Result<String> {
            let request = self.build_request(prompt)?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(|e| CleanerError::ApiError(e.to_string()))?;

            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| CleanerError::ApiError("Empty completion response".to_string()))
        }
    }

}
