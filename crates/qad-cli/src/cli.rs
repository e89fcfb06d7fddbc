use clap::{Parser, Subcommand};
use qad_core::types::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qad")]
#[command(about = "Question Answer Dispatcher: quota-aware batch answering over two model tiers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json)
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer every question in the input file, resuming from the cache
    Run {
        /// Input JSON: [{"qid", "question", "choices"}]
        #[arg(long)]
        input: PathBuf,

        /// Submission CSV (qid,answer)
        #[arg(long, default_value = "submission.csv")]
        output: PathBuf,

        /// Inference log JSON
        #[arg(long, default_value = "inference_log.json")]
        log: PathBuf,

        /// Cache namespace (defaults to cache.version from config)
        #[arg(long)]
        cache_version: Option<String>,

        /// Slots for the small tier (overrides tiers.small.concurrency)
        #[arg(long)]
        small_concurrency: Option<usize>,

        /// Slots for the large tier (overrides tiers.large.concurrency)
        #[arg(long)]
        large_concurrency: Option<usize>,

        /// Config file, merged over built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// API key file (overrides api.keys_file)
        #[arg(long)]
        keys: Option<PathBuf>,
    },

    /// Route questions without calling any model
    Classify {
        /// Input JSON: [{"qid", "question", "choices"}]
        #[arg(long)]
        input: PathBuf,
    },

    /// Inspect the result cache
    Cache {
        #[command(subcommand)]
        cmd: CacheCommands,
    },

    /// Score predictions against ground truth
    Evaluate {
        /// Predictions: cache snapshot, [{"qid", "answer"}] or {qid: answer}
        #[arg(long)]
        pred: PathBuf,

        /// Ground truth: [{"qid", "answer"}] or {qid: answer}
        #[arg(long)]
        gt: PathBuf,

        /// Save the full report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Entry counts per tier and category for one version
    Stats {
        /// Cache namespace (defaults to cache.version from config)
        #[arg(long)]
        cache_version: Option<String>,

        /// Config file, merged over built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List cached versions
    List {
        /// Config file, merged over built-in defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
