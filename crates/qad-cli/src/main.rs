use anyhow::{Context, Result};
use clap::Parser;
use qad_config::{DispatchConfig, validate_config, validate_loaded_config};
use std::path::Path;

mod cache_cmds;
mod classify_cmd;
mod cli;
mod evaluate_cmd;
mod input;
mod run_cmd;

use cli::{CacheCommands, Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let output_format = cli.format;

    match cli.command {
        Commands::Run {
            input,
            output,
            log,
            cache_version,
            small_concurrency,
            large_concurrency,
            config,
            keys,
        } => {
            let args = run_cmd::RunArgs {
                input,
                output,
                log,
                cache_version,
                small_concurrency,
                large_concurrency,
                keys,
            };
            let mut config = load_config(config.as_deref())?;
            let exit_code = run_cmd::handle_run(&mut config, args, output_format)?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Classify { input } => {
            classify_cmd::handle_classify(&input, output_format)?;
        }
        Commands::Cache { cmd } => match cmd {
            CacheCommands::Stats {
                cache_version,
                config,
            } => {
                let config = load_config(config.as_deref())?;
                cache_cmds::handle_cache_stats(&config, cache_version, output_format)?;
            }
            CacheCommands::List { config } => {
                let config = load_config(config.as_deref())?;
                cache_cmds::handle_cache_list(&config, output_format)?;
            }
        },
        Commands::Evaluate { pred, gt, output } => {
            evaluate_cmd::handle_evaluate(&pred, &gt, output.as_deref(), output_format)?;
        }
    }

    Ok(())
}

/// Explicit `--config` file, else the layered user/project config for CWD.
pub(crate) fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    match path {
        Some(path) => {
            let config = DispatchConfig::load_file(path)?;
            validate_loaded_config(&config)?;
            Ok(config)
        }
        None => {
            let cwd = std::env::current_dir().context("Failed to determine current directory")?;
            validate_config(&cwd)
        }
    }
}
