//! Sluice Webhook - Entry point
//!
//! Runs a single webhook input and writes every received record to stdout
//! as one JSON line.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use sluice_telemetry::{init_logging, LogConfig};
use sluice_webhook::{handler_fn, Record, ShutdownSignal, WebhookConfig, WebhookServer};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Human-readable logs instead of JSON.
    pretty: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut pretty = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--pretty" => {
                    pretty = true;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("sluice-webhook {}", sluice_webhook::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config, pretty }
    }
}

fn print_help() {
    println!(
        r#"Sluice Webhook - Push-based webhook ingestion

USAGE:
    sluice-webhook --config <PATH> [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to the webhook settings file (TOML or JSON)
        --pretty           Human-readable logs instead of JSON lines
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    RUST_LOG               Log filter (default: info)

SETTINGS:
    endpoint = "/webhook/orders"     # required
    listenAddress = ":8080"
    dataField = "events"
    timeout = 15                     # seconds
    queueSize = 100
    maxConcurrent = 4
    maxBodyBytes = 10485760

    [signature]
    type = "hmac-sha256"
    header = "X-Webhook-Signature"
    secret = "..."

    [rateLimit]
    requestsPerSecond = 50
    burst = 100

Received records are written to stdout, one JSON object per line.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_config = if args.pretty {
        LogConfig::development().with_level("info")
    } else {
        LogConfig::production()
    };
    init_logging(&log_config).context("failed to initialise logging")?;

    let path = args
        .config
        .context("missing --config <PATH>; use --help for usage information")?;
    info!(path = %path.display(), "loading webhook settings");
    let config = WebhookConfig::from_file(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    info!(version = sluice_webhook::VERSION, "starting sluice webhook");

    let handler = handler_fn(|records: Vec<Record>| async move {
        let mut stdout = std::io::stdout().lock();
        for record in &records {
            serde_json::to_writer(&mut stdout, record)?;
            stdout.write_all(b"\n")?;
        }
        stdout.flush()?;
        Ok(())
    });

    WebhookServer::new(config)
        .start(ShutdownSignal::new(), Some(handler))
        .await
        .context("webhook server failed")?;

    Ok(())
}
