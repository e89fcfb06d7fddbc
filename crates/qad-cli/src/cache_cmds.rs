use anyhow::Result;
use qad_cache::{CacheStats, list_versions, read_entries};
use qad_config::DispatchConfig;
use qad_core::types::OutputFormat;
use std::path::Path;

fn cache_stats(dir: &Path, version: &str) -> Result<CacheStats> {
    let entries = read_entries(dir, version)?;
    Ok(CacheStats::from_entries(version, entries.values()))
}

fn all_stats(dir: &Path) -> Result<Vec<CacheStats>> {
    list_versions(dir)?
        .iter()
        .map(|version| cache_stats(dir, version))
        .collect()
}

/// Handle `qad cache stats`. Reads without taking the cache lock.
pub(crate) fn handle_cache_stats(
    config: &DispatchConfig,
    cache_version: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let version = cache_version.unwrap_or_else(|| config.cache.version.clone());
    let stats = cache_stats(&config.cache.dir, &version)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Cache version: {}", stats.version);
            println!("Directory:     {}", config.cache.dir.display());
            println!("Entries:       {}", stats.count);
            for (tier, count) in &stats.by_tier {
                println!("  tier {:<9} {count}", tier.as_str());
            }
            for (category, count) in &stats.by_category {
                println!("  category {:<8} {count}", category.as_str());
            }
            if let Some(last) = stats.last_completed_at {
                println!("Last completed: {}", last.to_rfc3339());
            }
        }
    }
    Ok(())
}

/// Handle `qad cache list`.
pub(crate) fn handle_cache_list(config: &DispatchConfig, format: OutputFormat) -> Result<()> {
    let dir = &config.cache.dir;
    let versions = all_stats(dir)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
        OutputFormat::Text => {
            if versions.is_empty() {
                eprintln!("No cached versions in {}", dir.display());
                return Ok(());
            }
            println!("{:<20}  {:>8}  LAST COMPLETED", "VERSION", "ENTRIES");
            for stats in &versions {
                let last = stats
                    .last_completed_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<20}  {:>8}  {last}", stats.version, stats.count);
            }
        }
    }
    Ok(())
}
