// pear-bootstrap CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pear_bootstrap::{BootstrapConfig, BootstrapOptions, Bootstrapper};
use pear_bootstrap_common::peers::PeerEntry;
use pear_bootstrap_common::protocol::StreamEvent;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;
mod output;

use args::Cli;
use output::OutputFormat;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.json);

    match run(cli, format).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => BootstrapConfig::load_from(path)
            .with_context(|| format!("failed to load config `{}`", path.display()))?,
        None => BootstrapConfig::load().context("failed to load config")?,
    };
    init_tracing(&config.log_filter);

    let root_dir = cli.root_dir().context("failed to resolve --dir")?;
    let mut options = BootstrapOptions::new(cli.key, &root_dir)
        .app_link(cli.link.clone())
        .use_lock(cli.lock)
        .on_update(move |event| output::print_progress(format, "update", event))
        .on_status(move |event| {
            if let StreamEvent::Status(data) = event {
                output::print_progress(format, "status", data);
            }
        });
    options = match (&cli.dht_bootstrap, &config.dht_bootstrap) {
        (Some(raw), _) => options.dht_bootstrap([PeerEntry::Raw(raw.clone())]),
        (None, Some(peers)) => options.peers(peers),
        (None, None) => options,
    };

    info!(root = %root_dir.display(), link = %cli.link, "bootstrapping runtime");
    let bootstrapper = Bootstrapper::from_config(&config);
    let outcome = match cli.timeout {
        Some(secs) => {
            tokio::time::timeout(Duration::from_secs(secs), bootstrapper.bootstrap(&options))
                .await
                .with_context(|| format!("bootstrap did not finish within {secs}s"))?
        }
        None => bootstrapper.bootstrap(&options).await,
    };
    outcome.context("bootstrap failed")?;

    output::print_progress(format, "done", &json!({ "link": cli.link }));
    Ok(())
}

/// Logs go to stderr; stdout carries progress output only.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
