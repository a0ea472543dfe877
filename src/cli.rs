//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::MutateAction;

#[derive(Parser, Debug)]
#[command(name = "inbox-cleaner")]
#[command(version)]
#[command(about = "Scan, classify and clean up a Gmail inbox by sender", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file (overrides config)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Path to token cache file (overrides config)
    #[arg(long)]
    pub token_cache: Option<PathBuf>,

    /// Path to the scan snapshot file
    #[arg(long, default_value = ".inbox-cleaner/snapshot.json")]
    pub snapshot: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with the Gmail API
    Auth {
        /// Force re-authentication even if a cached token exists
        #[arg(long)]
        force: bool,
    },

    /// Scan the mailbox and build a classified sender snapshot
    Scan {
        /// Scan all mail instead of just the inbox
        #[arg(long)]
        all_mail: bool,

        /// Cap on messages to examine (overrides config)
        #[arg(long)]
        max: Option<usize>,

        /// Skip AI classification and use pattern rules only
        #[arg(long)]
        pattern_only: bool,
    },

    /// List scanned senders from the snapshot
    List {
        /// Only show senders in this category
        #[arg(short = 'C', long)]
        category: Option<String>,
    },

    /// Trash, archive or permanently delete messages by sender or category
    Delete {
        /// Sender address to target
        #[arg(short, long, conflicts_with = "category")]
        sender: Option<String>,

        /// Category to target (every sender classified under it)
        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Explicit sender addresses to target (repeatable)
        #[arg(
            long = "selected",
            conflicts_with_all = ["sender", "category"],
            num_args = 1..,
        )]
        selected: Vec<String>,

        /// What to do with the matched messages
        #[arg(long, value_enum, default_value_t = ActionArg::Trash)]
        action: ActionArg,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Apply category labels to scanned messages
    Sort {
        /// Only sort senders in this category
        #[arg(short = 'C', long)]
        category: Option<String>,
    },

    /// Trash old messages matching an age query
    Cleanup {
        /// Trash messages older than N days (default 90)
        #[arg(
            long,
            num_args = 0..=1,
            default_missing_value = "90",
            conflicts_with = "unread_older_than",
        )]
        older_than: Option<u32>,

        /// Trash unread messages older than N days (default 30)
        #[arg(long, num_args = 0..=1, default_missing_value = "30")]
        unread_older_than: Option<u32>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Unsubscribe from a sender's mailing list
    Unsubscribe {
        /// Sender address
        sender: String,
    },

    /// Show snapshot status
    Status,

    /// Generate an example configuration file
    InitConfig {
        /// Path to create the config file at
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    /// Move to trash (reversible for ~30 days)
    Trash,
    /// Remove from the inbox, keep in all mail
    Archive,
    /// Permanently delete
    Delete,
}

impl From<ActionArg> for MutateAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Trash => MutateAction::Trash,
            ActionArg::Archive => MutateAction::Archive,
            ActionArg::Delete => MutateAction::Delete,
        }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }

    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
