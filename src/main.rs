// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use metric_sink::config::{apply_env_overrides, load_config_with_env, ConfigLoader};
use metric_sink::ingest::{ingest_lines, StopReason};
use metric_sink::{SinkConfig, StreamWriterRegistry, WriteMode};

/// Metric Sink - Append newline-delimited JSON metrics from stdin to rolling files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base output URI (overrides config file)
    #[arg(short, long)]
    output: Option<String>,

    /// Output mode: append or overwrite (overrides config file)
    #[arg(short, long)]
    mode: Option<WriteMode>,

    /// Roll size in bytes (overrides config file)
    #[arg(long)]
    roll_size_bytes: Option<u64>,

    /// Stream name every input line is reported to
    #[arg(short, long)]
    stream: String,
}

fn build_config(args: &Args) -> Result<SinkConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_with_env(path)?,
        None => {
            let mut config = SinkConfig::default();
            apply_env_overrides(&mut config)?;
            config
        }
    };

    // Apply CLI overrides
    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(roll_size_bytes) = args.roll_size_bytes {
        config.roll_size_bytes = roll_size_bytes;
    }

    ConfigLoader::validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let config = build_config(&args)?;

    // Initialize tracing; RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Metric Sink");
    info!("Output: {} (mode {:?})", config.output, config.mode);

    let registry = StreamWriterRegistry::configure(&config).await?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Unable to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    let summary = ingest_lines(
        &registry,
        &args.stream,
        BufReader::new(tokio::io::stdin()),
        shutdown,
    )
    .await;

    registry.close().await;

    let stats = registry.stats().await;
    info!(
        "Metric Sink shut down: {} lines read, {} records appended, {} dropped, {} files",
        summary.lines_read, stats.records_appended, stats.records_dropped, stats.files_opened
    );

    if summary.stop == StopReason::ReadError {
        bail!("Input ended with a read error after line {}", summary.lines_read);
    }

    Ok(())
}
