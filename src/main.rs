use anyhow::Result;
use clap::Parser;
use indicatif::MultiProgress;
use inbox_cleaner::cli::{Cli, Commands, ProgressReporter};
use inbox_cleaner::client::{GmailMailClient, MailClient, ProgressCallback};
use inbox_cleaner::config::Config;
use inbox_cleaner::models::{MutateAction, ScanScope};
use inbox_cleaner::mutator::{BulkMutator, Selection, UnsubscribeOutcome};
use inbox_cleaner::rate_limiter::RequestPacer;
use inbox_cleaner::scanner::{CancelToken, ScanOptions, ScanOrchestrator, ScanProgressCallback};
use inbox_cleaner::store::{JsonFileStore, SnapshotStore};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Line-buffered writer that prints through MultiProgress so log lines
/// land above the progress bars instead of tearing them
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn print_line(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            let _ = self.multi.println(line);
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.extend_from_slice(buf);

        // Emit every complete line now, keep the partial tail buffered
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            self.print_line(&line[..line.len() - 1]);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap();
        if !buffer.is_empty() {
            let tail = std::mem::take(&mut *buffer);
            self.print_line(&tail);
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl MultiProgressMakeWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: inbox-cleaner --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_cleaner=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_cleaner=info,warn,error"))
    };

    // Shared MultiProgress so logs print above progress bars
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter::new(Arc::clone(&multi_progress));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = Config::load(&cli.config).await?;
    let credentials = cli
        .credentials
        .clone()
        .unwrap_or_else(|| config.auth.credentials.clone());
    let token_cache = cli
        .token_cache
        .clone()
        .unwrap_or_else(|| config.auth.token_cache.clone());

    match cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if force && token_cache.exists() {
                tokio::fs::remove_file(&token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let (hub, _) =
                inbox_cleaner::auth::authenticate(&credentials, &token_cache, true).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", token_cache);

            // Verify the connection without triggering another OAuth flow
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Scan {
            all_mail,
            max,
            pattern_only,
        } => {
            let client = build_client(&config, &credentials, &token_cache).await?;
            let store = Arc::new(JsonFileStore::new(&cli.snapshot));

            let mut options = ScanOptions {
                scope: if all_mail {
                    ScanScope::AllMail
                } else {
                    config.scan.scan_scope()?
                },
                page_size: config.scan.page_size,
                chunk_size: config.scan.chunk_size,
                max_messages: config.scan.max_messages,
                ai_batch_size: config.classification.batch_size,
                ai_batch_delay: config.classification.batch_delay(),
            };
            if let Some(max) = max {
                options.max_messages = max;
            }

            let mut orchestrator = ScanOrchestrator::new(client, store.clone(), options);
            if !pattern_only {
                if let Some(provider) = completion_provider(&config) {
                    orchestrator = orchestrator.with_provider(provider);
                }
            }

            // Ctrl-C cancels cooperatively; the current request completes
            // and nothing is persisted
            let cancel = CancelToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nCancelling scan...");
                    ctrl_c_token.cancel();
                }
            });

            let reporter = ProgressReporter::new();
            let bar = reporter.add_spinner("Scanning mailbox...");
            let bar_for_cb = bar.clone();
            let on_progress: ScanProgressCallback = Arc::new(move |p| {
                bar_for_cb.set_message(format!(
                    "{}: {}/{} ({}%)",
                    p.phase.as_str(),
                    p.processed,
                    p.total,
                    p.percentage
                ));
            });

            let outcome = orchestrator.scan(&cancel, Some(on_progress)).await?;
            reporter.finish_spinner(
                &bar,
                &format!(
                    "Scanned {} messages, {} senders",
                    outcome.messages_scanned, outcome.sender_count
                ),
            );

            println!("\nScan summary");
            println!("  Messages scanned:  {}", outcome.messages_scanned);
            println!("  Senders found:     {}", outcome.sender_count);
            println!("  Categories:        {}", outcome.category_count);
            println!("  Skipped (sent):    {}", outcome.skipped_sent);
            println!("  Skipped (labeled): {}", outcome.skipped_labeled);
            println!(
                "  Classifier:        {}",
                if outcome.ai_classified { "AI" } else { "pattern rules" }
            );
            println!("\nSnapshot saved to {:?}", cli.snapshot);

            Ok(())
        }

        Commands::List { category } => {
            let store = JsonFileStore::new(&cli.snapshot);
            let snapshot = store
                .load()
                .await?
                .ok_or_else(|| anyhow::anyhow!("No snapshot found; run 'scan' first"))?;

            let filter_category = category.as_deref();
            let mut shown = 0;
            for sender in &snapshot.senders {
                let sender_category = snapshot
                    .classifications
                    .get(&sender.email)
                    .map(String::as_str)
                    .unwrap_or("Other");
                if let Some(wanted) = filter_category {
                    if wanted != sender_category {
                        continue;
                    }
                }
                let unsub = if sender.unsubscribe.is_some() { "unsub" } else { "" };
                println!(
                    "{:>6}  {:<14} {:<40} {}  {}",
                    sender.count, sender_category, sender.email, sender.name, unsub
                );
                shown += 1;
            }

            println!("\n{} senders", shown);
            Ok(())
        }

        Commands::Delete {
            sender,
            category,
            selected,
            action,
            yes,
        } => {
            let selection = match (sender, category, selected) {
                (Some(email), None, _) => Selection::Sender(email),
                (None, Some(cat), _) => Selection::Category(cat),
                (None, None, emails) if !emails.is_empty() => Selection::Senders(emails),
                _ => anyhow::bail!("Specify one of --sender, --category or --selected"),
            };
            let action: MutateAction = action.into();

            let store = Arc::new(JsonFileStore::new(&cli.snapshot));
            if !yes {
                confirm_mutation(&*store, &selection, &action).await?;
            }

            let client = build_client(&config, &credentials, &token_cache).await?;
            let mutator = BulkMutator::new(client, store);

            let reporter = ProgressReporter::new();
            let bar = reporter.add_spinner(&format!("Applying {}...", action.as_str()));
            let bar_for_cb = bar.clone();
            let on_progress: ProgressCallback = Arc::new(move |p| {
                bar_for_cb.set_message(format!(
                    "{}/{} messages ({}%)",
                    p.processed, p.total, p.percentage
                ));
            });

            let report = mutator.execute(&selection, &action, Some(on_progress)).await?;
            reporter.finish_spinner(
                &bar,
                &format!(
                    "{}: {} succeeded, {} failed",
                    action.as_str(),
                    report.outcome.success,
                    report.outcome.failed
                ),
            );

            if report.senders_retained > 0 {
                println!(
                    "{} senders kept in the snapshot because some messages failed; re-run to retry",
                    report.senders_retained
                );
            }

            Ok(())
        }

        Commands::Sort { category } => {
            let store = Arc::new(JsonFileStore::new(&cli.snapshot));
            let selection = match category {
                Some(cat) => Selection::Category(cat),
                None => {
                    let snapshot = store
                        .load()
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("No snapshot found; run 'scan' first"))?;
                    let emails: Vec<String> =
                        snapshot.senders.iter().map(|s| s.email.clone()).collect();
                    if emails.is_empty() {
                        anyhow::bail!("Snapshot has no senders to sort");
                    }
                    Selection::Senders(emails)
                }
            };

            let client = build_client(&config, &credentials, &token_cache).await?;
            let mutator = BulkMutator::new(client, store);

            let reporter = ProgressReporter::new();
            let bar = reporter.add_spinner("Sorting into category labels...");
            let bar_for_cb = bar.clone();
            let on_progress: ProgressCallback = Arc::new(move |p| {
                bar_for_cb.set_message(format!(
                    "{}/{} messages ({}%)",
                    p.processed, p.total, p.percentage
                ));
            });

            let report = mutator.sort(&selection, Some(on_progress)).await?;
            reporter.finish_spinner(
                &bar,
                &format!(
                    "Sorted {} messages into {} labels ({} failed)",
                    report.outcome.success,
                    report.labels.len(),
                    report.outcome.failed
                ),
            );
            for label in &report.labels {
                println!("  applied {}", label);
            }

            Ok(())
        }

        Commands::Cleanup {
            older_than,
            unread_older_than,
            yes,
        } => {
            let (query, description) = match (older_than, unread_older_than) {
                (Some(days), None) => (
                    inbox_cleaner::mutator::older_than_query(days),
                    format!("messages older than {} days", days),
                ),
                (None, Some(days)) => (
                    inbox_cleaner::mutator::unread_older_than_query(days),
                    format!("unread messages older than {} days", days),
                ),
                _ => anyhow::bail!("Specify --older-than or --unread-older-than"),
            };

            if !yes {
                println!(
                    "This will trash up to {} {}.",
                    config.scan.max_messages, description
                );
                print!("Continue? [y/N] ");
                std::io::stdout().flush()?;
                let mut answer = String::new();
                std::io::stdin().read_line(&mut answer)?;
                if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                    anyhow::bail!("Aborted");
                }
            }

            let client = build_client(&config, &credentials, &token_cache).await?;
            let store = Arc::new(JsonFileStore::new(&cli.snapshot));
            let mutator = BulkMutator::new(client, store);

            let reporter = ProgressReporter::new();
            let bar = reporter.add_spinner(&format!("Trashing {}...", description));
            let bar_for_cb = bar.clone();
            let on_progress: ProgressCallback = Arc::new(move |p| {
                bar_for_cb.set_message(format!(
                    "{}/{} messages ({}%)",
                    p.processed, p.total, p.percentage
                ));
            });

            let outcome = mutator
                .cleanup(&query, config.scan.max_messages, Some(on_progress))
                .await?;
            reporter.finish_spinner(
                &bar,
                &format!(
                    "Trashed {} messages ({} failed)",
                    outcome.success, outcome.failed
                ),
            );

            Ok(())
        }

        Commands::Unsubscribe { sender } => {
            let client = build_client(&config, &credentials, &token_cache).await?;
            let store = Arc::new(JsonFileStore::new(&cli.snapshot));
            let mutator = BulkMutator::new(client, store);

            match mutator.unsubscribe(&sender).await? {
                UnsubscribeOutcome::OpenUrl { url, one_click } => {
                    println!("Open this URL to unsubscribe:");
                    println!("  {}", url);
                    if one_click {
                        println!("(supports one-click unsubscribe)");
                    }
                }
                UnsubscribeOutcome::EmailSent { to } => {
                    println!("Unsubscribe email sent to {}", to);
                }
            }

            Ok(())
        }

        Commands::Status => {
            let store = JsonFileStore::new(&cli.snapshot);
            match store.load().await? {
                Some(snapshot) => {
                    println!("Snapshot: {:?}", cli.snapshot);
                    match snapshot.last_scan {
                        Some(at) => println!("Last scan: {}", at.to_rfc3339()),
                        None => println!("Last scan: unknown"),
                    }
                    println!("Senders:   {}", snapshot.senders.len());
                    println!("Categories:");
                    for category in &snapshot.categories {
                        let count = snapshot
                            .classifications
                            .values()
                            .filter(|c| *c == category)
                            .count();
                        println!("  {:<14} {}", category, count);
                    }
                }
                None => println!("No snapshot found; run 'scan' first"),
            }

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "{:?} already exists; use --force to overwrite",
                    output
                );
            }
            tokio::fs::write(&output, Config::example_toml()).await?;
            println!("Wrote example config to {:?}", output);
            Ok(())
        }
    }
}

/// Authenticate silently and build the paced Gmail client
async fn build_client(
    config: &Config,
    credentials: &PathBuf,
    token_cache: &PathBuf,
) -> Result<Arc<dyn MailClient>> {
    let (hub, authenticator) =
        inbox_cleaner::auth::authenticate(credentials, token_cache, false).await?;
    let pacer = RequestPacer::new(config.rate.requests_per_second);
    Ok(Arc::new(GmailMailClient::new(hub, authenticator, pacer)))
}

/// Show exactly what a mutation will touch and ask before proceeding
async fn confirm_mutation(
    store: &dyn SnapshotStore,
    selection: &Selection,
    action: &MutateAction,
) -> Result<()> {
    let snapshot = store
        .load()
        .await?
        .ok_or_else(|| anyhow::anyhow!("No snapshot found; run 'scan' first"))?;

    let (sender_count, message_count) = match selection {
        Selection::Sender(email) => match snapshot.sender(email) {
            Some(s) => (1, s.message_ids.len()),
            None => (0, 0),
        },
        Selection::Category(category) => {
            let emails: Vec<&String> = snapshot
                .classifications
                .iter()
                .filter(|(_, c)| c.as_str() == category)
                .map(|(email, _)| email)
                .collect();
            let messages = snapshot
                .senders
                .iter()
                .filter(|s| emails.iter().any(|e| **e == s.email))
                .map(|s| s.message_ids.len())
                .sum();
            (emails.len(), messages)
        }
        Selection::Senders(emails) => {
            let messages = snapshot
                .senders
                .iter()
                .filter(|s| emails.contains(&s.email))
                .map(|s| s.message_ids.len())
                .sum();
            (emails.len(), messages)
        }
    };

    println!(
        "This will {} {} messages from {} senders.",
        action.as_str(),
        message_count,
        sender_count
    );
    if matches!(action, MutateAction::Delete) {
        println!("Permanent delete cannot be undone.");
    }
    print!("Continue? [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        anyhow::bail!("Aborted");
    }

    Ok(())
}

/// Build the AI completion provider when the ml feature is enabled and an
/// API key is present
#[cfg(feature = "ml")]
fn completion_provider(
    config: &Config,
) -> Option<Arc<dyn inbox_cleaner::classifier::CompletionProvider>> {
    if std::env::var("OPENAI_API_KEY").is_err() {
        tracing::warn!("OPENAI_API_KEY not set, using pattern classification");
        return None;
    }
    Some(Arc::new(
        inbox_cleaner::classifier::openai::OpenAiProvider::new(
            config.classification.model.clone(),
        ),
    ))
}

#[cfg(not(feature = "ml"))]
fn completion_provider(
    _config: &Config,
) -> Option<Arc<dyn inbox_cleaner::classifier::CompletionProvider>> {
    None
}
