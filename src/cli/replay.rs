use crate::config::{load_config, ConfigError};
use crate::event::RawEvent;
use crate::instrument::Instrumentation;
use crate::lifecycle::{LifecycleError, Pipeline};
use crate::pipeline::ShutdownReport;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to read events: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: usize,
    pub queued: usize,
    pub not_queued: usize,
    pub malformed: usize,
}

pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

pub async fn run(
    config_path: Option<PathBuf>,
    events: &Path,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/mcpwatch/config.yml");
            eprintln!("  /etc/mcpwatch/config.yml");
            eprintln!(
                "\nUse --config <path> to specify a config file, \
                 or run 'mcpwatch config init' to generate one."
            );
            std::process::exit(1);
        }
    };

    let report = replay_file(&config_path, events, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn replay_file(
    config_path: &Path,
    events: &Path,
    timeout: Duration,
) -> Result<ShutdownReport, ReplayError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let file_config = load_config(config_path)?;
    let pipeline = Pipeline::new(file_config.to_pipeline_config()?, file_config.server_info())?;

    let instrumentation = pipeline.start()?;
    let reader = BufReader::new(File::open(events)?);
    let summary = replay_lines(&instrumentation, reader)?;
    info!(
        lines = summary.lines,
        queued = summary.queued,
        not_queued = summary.not_queued,
        malformed = summary.malformed,
        "Replayed events"
    );

    Ok(pipeline.stop(timeout).await?)
}

/// Report every JSON-lines `RawEvent` from `reader`. Blank lines are skipped;
/// malformed lines are logged and counted.
pub fn replay_lines<R: BufRead>(
    instrumentation: &Instrumentation,
    reader: R,
) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        match serde_json::from_str::<RawEvent>(&line) {
            Ok(raw) => {
                if instrumentation.report(raw) {
                    summary.queued += 1;
                } else {
                    summary.not_queued += 1;
                }
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed event");
                summary.malformed += 1;
            }
        }
    }

    Ok(summary)
}
