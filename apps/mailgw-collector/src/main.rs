//! # mailgw-collector
//!
//! Thin CLI wrapper around the [`mailgw_audit`] harvester.
//!
//! Polls the configured appliances and prints every newly observed audit
//! record to stdout as one JSON line. Logs go to stderr so the record
//! stream stays clean for piping. Ctrl-C shuts the poll loop down
//! cooperatively; the process exits once the stream closes.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use mailgw_audit::{Opts, Service};

/// Mail-gateway audit-log collector.
#[derive(Parser)]
#[command(name = "mailgw-collector", about = "Streams appliance audit logs as JSON lines")]
struct Cli {
    /// Appliance endpoints, e.g. https://gw01/mail/en-US/cgi-bin/klwi.
    #[arg(long = "urls", env = "MAILGW_URLS", value_delimiter = ',', required = true)]
    urls: Vec<String>,

    /// Appliance admin user name.
    #[arg(long = "admin-user", env = "MAILGW_USER")]
    user: String,

    /// Appliance admin password.
    #[arg(long = "admin-password", env = "MAILGW_PASS")]
    password: String,

    /// Sleep between poll cycles, seconds.
    #[arg(long = "sleep-time", env = "MAILGW_SLEEP_TIME", default_value_t = 60)]
    sleep_secs: u64,

    /// HTTP request timeout, seconds.
    #[arg(long = "http-timeout", env = "MAILGW_TIMEOUT", default_value_t = 5)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they don't interfere with records on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("mailgw_audit=info".parse()?)
                .add_directive("mailgw_collector=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let (service, mut stream) = Service::new(Opts {
        urls: cli.urls,
        user: cli.user,
        password: cli.password,
        timeout: Duration::from_secs(cli.timeout_secs),
        poll_interval: Duration::from_secs(cli.sleep_secs),
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(service.run(shutdown_rx));

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    while let Some(record) = stream.next().await {
        println!("{}", serde_json::to_string(&record)?);
    }

    loop_handle.await?;
    tracing::info!("stream closed, collector exiting");
    Ok(())
}
