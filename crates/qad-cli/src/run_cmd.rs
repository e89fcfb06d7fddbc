use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qad_config::{DispatchConfig, validate_loaded_config};
use qad_core::task::{Task, TaskId, TaskResult};
use qad_core::types::{Category, OutputFormat, Tier};
use qad_dispatch::{DispatchOptions, Dispatcher, RunReport, RunStats};
use qad_router::{PatternExtractor, QuestionRouter};
use qad_transport::{ApiKeys, VnptClient};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use ulid::Ulid;

use crate::input::{build_tasks, load_questions, write_submission};

/// Raw responses in the log are cut to this many characters.
const RAW_PREVIEW_CHARS: usize = 500;

/// Answers decided by rule, keyed by task id.
pub(crate) type RuleAnswers = BTreeMap<TaskId, char>;

pub(crate) struct RunArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub cache_version: Option<String>,
    pub small_concurrency: Option<usize>,
    pub large_concurrency: Option<usize>,
    pub keys: Option<PathBuf>,
}

/// Handle `qad run`. Returns the process exit code: 1 when any task failed.
///
/// Outputs are written before the code is returned, so a partial run still
/// leaves a complete submission (failed ids carry their fallback answer).
pub(crate) fn handle_run(
    config: &mut DispatchConfig,
    args: RunArgs,
    format: OutputFormat,
) -> Result<i32> {
    if let Some(slots) = args.small_concurrency {
        config.set_concurrency(Tier::Small, slots);
    }
    if let Some(slots) = args.large_concurrency {
        config.set_concurrency(Tier::Large, slots);
    }
    validate_loaded_config(config)?;
    if let Some(keys) = args.keys {
        config.api.keys_file = keys;
    }
    let version = args
        .cache_version
        .unwrap_or_else(|| config.cache.version.clone());

    let questions = load_questions(&args.input)?;
    let tasks = build_tasks(&questions, &QuestionRouter::new());
    let rules = rule_answers(&tasks);
    let dispatched: Vec<Task> = tasks
        .iter()
        .filter(|task| !rules.contains_key(&task.id))
        .cloned()
        .collect();

    let keys = ApiKeys::load(&config.api.keys_file)?;
    let client = VnptClient::new(config, &keys)?;
    let dispatcher = Dispatcher::new(
        DispatchOptions::from_config(config),
        Arc::new(client),
        Arc::new(PatternExtractor),
    );

    let run_id = Ulid::new();
    let concurrency = config.tiers.concurrency();
    info!(
        run_id = %run_id,
        questions = questions.len(),
        rule_answered = rules.len(),
        cache_version = %version,
        cache_dir = %dispatcher.options().cache_dir.display(),
        small_slots = concurrency.small,
        large_slots = concurrency.large,
        "Starting run"
    );

    let report = dispatcher.run(dispatched, &version, concurrency.small, concurrency.large)?;

    write_submission(&args.output, final_answers(&tasks, &rules, &report))?;
    let log = InferenceLog::build(run_id, &version, &tasks, &rules, &report);
    write_log(&args.log, &log)?;

    for (id, reason) in report.failures() {
        warn!(qid = %id, reason = %reason, "Task failed; fallback answer written");
    }
    print_summary(&log, &args.output, &args.log, format)?;

    Ok(if report.has_failures() { 1 } else { 0 })
}

/// Rule answers of each id's first occurrence. Those ids skip dispatch.
pub(crate) fn rule_answers(tasks: &[Task]) -> RuleAnswers {
    let mut seen = HashSet::new();
    tasks
        .iter()
        .filter(|task| seen.insert(task.id.as_str()))
        .filter_map(|task| Some((task.id.clone(), task.rule_answer?)))
        .collect()
}

/// One answer per input task, in input order. Failed ids get their fallback.
pub(crate) fn final_answers<'a>(
    tasks: &'a [Task],
    rules: &'a RuleAnswers,
    report: &'a RunReport,
) -> impl Iterator<Item = (&'a str, char)> + 'a {
    tasks.iter().map(|task| {
        let answer = rules
            .get(&task.id)
            .copied()
            .or_else(|| report.answer(&task.id))
            .unwrap_or(task.fallback_answer);
        (task.id.as_str(), answer)
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct LogRecord {
    pub qid: String,
    pub category: Category,
    pub preferred_tier: Tier,
    pub status: &'static str,
    pub answer: char,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_used: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InferenceLog<'a> {
    pub run_id: String,
    pub cache_version: &'a str,
    pub generated_at: DateTime<Utc>,
    /// Questions answered by rule, with no model call.
    pub rule_answered: usize,
    pub stats: &'a RunStats,
    pub records: Vec<LogRecord>,
}

impl<'a> InferenceLog<'a> {
    /// One record per distinct task id, in input order.
    pub(crate) fn build(
        run_id: Ulid,
        cache_version: &'a str,
        tasks: &[Task],
        rules: &RuleAnswers,
        report: &'a RunReport,
    ) -> Self {
        let mut seen = HashSet::new();
        let records = tasks
            .iter()
            .filter(|task| seen.insert(task.id.as_str()))
            .map(|task| match rules.get(&task.id) {
                Some(answer) => rule_record(task, *answer),
                None => log_record(task, report.get(&task.id)),
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            cache_version,
            generated_at: Utc::now(),
            rule_answered: rules.len(),
            stats: &report.stats,
            records,
        }
    }

    fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.status == "failed").count()
    }
}

fn rule_record(task: &Task, answer: char) -> LogRecord {
    LogRecord {
        qid: task.id.clone(),
        category: task.category,
        preferred_tier: task.preferred_tier,
        status: "rule",
        answer,
        tier_used: None,
        response_preview: None,
        error: None,
    }
}

fn log_record(task: &Task, result: Option<&TaskResult>) -> LogRecord {
    let mut record = LogRecord {
        qid: task.id.clone(),
        category: task.category,
        preferred_tier: task.preferred_tier,
        status: "failed",
        answer: task.fallback_answer,
        tier_used: None,
        response_preview: None,
        error: None,
    };
    match result {
        Some(TaskResult::Resolved(entry)) => {
            record.status = "resolved";
            record.answer = entry.answer;
            record.tier_used = Some(entry.tier_used);
            record.response_preview = entry
                .raw_responses
                .last()
                .map(|raw| raw.chars().take(RAW_PREVIEW_CHARS).collect());
        }
        Some(TaskResult::Failed(reason)) => record.error = Some(reason.to_string()),
        None => record.error = Some("no result reported".to_string()),
    }
    record
}

fn write_log(path: &Path, log: &InferenceLog<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(log).context("Failed to serialize inference log")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write inference log: {}", path.display()))
}

fn print_summary(
    log: &InferenceLog<'_>,
    output: &Path,
    log_path: &Path,
    format: OutputFormat,
) -> Result<()> {
    let stats = log.stats;
    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "run_id": log.run_id,
                "cache_version": log.cache_version,
                "submission": output.display().to_string(),
                "log": log_path.display().to_string(),
                "rule_answered": log.rule_answered,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!("Run {} (cache version '{}')", log.run_id, log.cache_version);
            println!(
                "  Questions: {} ({} from cache, {} duplicate rows)",
                stats.total + log.rule_answered,
                stats.from_cache,
                stats.duplicates
            );
            println!("  By rule:   {} (no model call)", log.rule_answered);
            println!(
                "  Answered:  small {} / large {}",
                stats.completed.small, stats.completed.large
            );
            println!(
                "  Rerouted:  {} (escalated {}, rate-limited {}, quota waits {})",
                stats.rerouted, stats.escalated, stats.rate_limited, stats.quota_waits
            );
            println!("  Failed:    {}", log.failed());
            if stats.unpersisted > 0 {
                println!("  Not cached: {}", stats.unpersisted);
            }
            println!("Submission: {}", output.display());
            println!("Log:        {}", log_path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "run_cmd_tests.rs"]
mod tests;
