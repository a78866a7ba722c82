//! Snapshot service entry point.
//!
//! Loads the configuration named on the command line, sets up the daily log
//! files and runs the capture loop until the process is killed. Only
//! configuration problems stop the service; they are logged and reported
//! through a non-zero exit.

use anyhow::{Context, Result};
use clap::Parser;
use nier_snapshot::{CaptureConfig, CaptureScheduler, LogContext, LogFormat};
use std::path::PathBuf;
use tracing::{error, info};

/// Periodically capture a still frame from an RTSP stream.
#[derive(Debug, Parser)]
#[command(name = "nier-snapshot", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Console logging until the configured log directory is known.
    let bootstrap = LogContext::console("info", LogFormat::Text);
    let config = bootstrap.in_scope(|| load_config(&args))?;

    let log = LogContext::from_config(&config);
    log.in_scope(|| {
        config.validate().map_err(|e| {
            error!(error = %e, "invalid configuration");
            e
        })
    })?;

    let scheduler = log.in_scope(|| {
        info!(
            service = "nier-snapshot",
            version = env!("CARGO_PKG_VERSION"),
            rtsp_url = %config.rtsp_url,
            destination = ?config.delivery_target(),
            "Starting snapshot service"
        );
        CaptureScheduler::from_config(&config, log.clone()).map_err(|e| {
            error!(error = %e, "failed to set up frame delivery");
            e
        })
    })?;

    scheduler.run().await;
    Ok(())
}

fn load_config(args: &Args) -> Result<CaptureConfig> {
    CaptureConfig::load(&args.config)
        .map_err(|e| {
            error!(path = %args.config.display(), error = %e, "load config failed");
            e
        })
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["nier-snapshot"]);
        assert_eq!(args.config, PathBuf::from("config.yaml"));
    }

    #[test]
    fn test_config_flag() {
        let args = Args::parse_from(["nier-snapshot", "--config", "/etc/snapshot/camera-7.yaml"]);
        assert_eq!(args.config, PathBuf::from("/etc/snapshot/camera-7.yaml"));

        let args = Args::parse_from(["nier-snapshot", "-c", "cam.yaml"]);
        assert_eq!(args.config, PathBuf::from("cam.yaml"));
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args {
            config: dir.path().join("missing.yaml"),
        };
        assert!(load_config(&args).is_err());
    }
}
