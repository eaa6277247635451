//! # pulse-stream
//!
//! Command-line client that opens one streaming session and prints every
//! message it receives as a JSON line.
//!
//! ## Usage
//!
//! ```bash
//! # Use pulse-stream.toml from a default location
//! pulse-stream
//!
//! # Run with a specific config
//! pulse-stream --config /path/to/pulse-stream.toml
//!
//! # Run with environment variables
//! PULSE_STREAM_KIND=sse PULSE_STREAM_ADDRESS=https://example.com/events pulse-stream
//! ```

mod config;
mod metrics;

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use tenvis_stream_core::{SessionStore, Status};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: pulse-stream [--config <path>]";

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = args.next().context("--config needs a path")?;
                path = Some(PathBuf::from(shellexpand::tilde(&value).into_owned()));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries messages
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pulse_stream=info,tenvis_stream_core=info,tenvis_stream_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let path = parse_args(std::env::args().skip(1))?;
    let config = config::Config::load(path.as_deref())?;

    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    info!(
        transport = %config.session.kind,
        address = %config.session.address,
        "Starting pulse-stream"
    );

    let session = tenvis_stream_transport::connect(config.session.clone())
        .context("Failed to create session")?;

    session.on_status(|status| info!(%status, "Status changed"));
    session.on_error(|err| warn!(error = %err, "Transport error"));
    session.on_message(|payload| match serde_json::to_string(payload) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}") {
                warn!(error = %e, "Failed to write message");
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode message"),
    });

    let store = SessionStore::mount(session).await?;
    let mut updates = store.watch();
    let auto_reconnect = config.session.auto_reconnect;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, closing session");
        }
        _ = updates.wait_for(|s| !auto_reconnect && matches!(s.status, Status::Closed | Status::Error)) => {
            info!("Transport finished");
        }
    }

    store.unmount().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])).unwrap(), None);
        assert_eq!(
            parse_args(args(&["--config", "/tmp/p.toml"])).unwrap(),
            Some(PathBuf::from("/tmp/p.toml"))
        );
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }
}
