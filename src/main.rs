mod aggregate;
mod config;
mod errors;
mod grading;
mod orchestrator;
mod payload;
mod results;
mod sample;
mod server;
mod stats;
mod transfer;

use crate::config::{parse_ping_servers, ClientConfig, ServerConfig, SizeBounds};
use crate::errors::{exit_codes, GaugeError};
use crate::orchestrator::Orchestrator;
use crate::results::{Provenance, SpeedTestResult};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use log::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a speed test against a transfer endpoint.
    Test {
        /// Base URL of the transfer endpoint.
        #[arg(long, env = "NETGAUGE_SERVER", default_value = "http://localhost:3210")]
        server: String,

        /// Comma-separated latency probe targets. Defaults to the
        /// transfer endpoint itself.
        #[arg(long, env = "NETGAUGE_PING_SERVERS")]
        ping_servers: Option<String>,

        /// Probes per ping server.
        #[arg(long, env = "NETGAUGE_PING_MEASUREMENTS")]
        ping_measurements: Option<usize>,

        /// Probes in the jitter sequence.
        #[arg(long, env = "NETGAUGE_JITTER_MEASUREMENTS")]
        jitter_measurements: Option<usize>,

        /// Per-attempt timeout for bulk transfers, milliseconds.
        #[arg(long, env = "NETGAUGE_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Per-attempt timeout for latency probes, milliseconds.
        #[arg(long, env = "NETGAUGE_PROBE_TIMEOUT_MS")]
        probe_timeout_ms: Option<u64>,

        /// Budget for the whole run, milliseconds. When exhausted,
        /// remaining metrics are estimated instead of probed.
        #[arg(long, env = "NETGAUGE_DEADLINE_MS")]
        deadline_ms: Option<u64>,

        /// Opaque client identifier attached to the result.
        #[arg(long)]
        client_id: Option<String>,

        /// Print the result as JSON instead of a terminal summary.
        #[arg(long)]
        json: bool,
    },

    /// Serve the transfer endpoint.
    Serve {
        #[arg(long, env = "NETGAUGE_PORT", default_value_t = 3210)]
        port: u16,

        /// Lower clamp bound for transfer sizes, bytes.
        #[arg(long, env = "NETGAUGE_MIN_FILE_SIZE")]
        min_file_size: Option<u64>,

        /// Upper clamp bound for transfer sizes, bytes.
        #[arg(long, env = "NETGAUGE_MAX_FILE_SIZE")]
        max_file_size: Option<u64>,

        /// Hard ceiling for a single upload body, bytes.
        #[arg(long, env = "NETGAUGE_MAX_UPLOAD_SIZE")]
        max_upload_size: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let code = match dispatch(cli.command).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(error) => {
            eprintln!("{}", error);
            error.exit_code()
        }
    };

    std::process::exit(code);
}

async fn dispatch(command: Command) -> Result<(), GaugeError> {
    match command {
        Command::Test {
            server,
            ping_servers,
            ping_measurements,
            jitter_measurements,
            timeout_ms,
            probe_timeout_ms,
            deadline_ms,
            client_id,
            json,
        } => {
            let defaults = ClientConfig::default();
            let config = ClientConfig {
                server,
                ping_servers: ping_servers
                    .as_deref()
                    .map(parse_ping_servers)
                    .unwrap_or_default(),
                ping_measurements: ping_measurements
                    .unwrap_or(defaults.ping_measurements),
                jitter_measurements: jitter_measurements
                    .unwrap_or(defaults.jitter_measurements),
                timeout_ms: timeout_ms.unwrap_or(defaults.timeout_ms),
                probe_timeout_ms: probe_timeout_ms
                    .unwrap_or(defaults.probe_timeout_ms),
                overall_deadline_ms: deadline_ms,
                client_identity: client_id,
                ..defaults
            };

            run_test(config, json).await
        }
        Command::Serve { port, min_file_size, max_file_size, max_upload_size } => {
            let defaults = ServerConfig::default();
            let bounds = SizeBounds::new(
                min_file_size.unwrap_or(defaults.bounds.min),
                max_file_size.unwrap_or(defaults.bounds.max),
            )?;
            let config = ServerConfig {
                port,
                bounds,
                max_upload_size: max_upload_size
                    .unwrap_or(defaults.max_upload_size),
                ..defaults
            };

            server::serve(config).await
        }
    }
}

async fn run_test(config: ClientConfig, json: bool) -> Result<(), GaugeError> {
    let mut orchestrator = Orchestrator::new(config)?;

    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<crate::orchestrator::Progress>();
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            info!("[{}] {}%", progress.phase, progress.percent);
        }
    });

    let result = orchestrator.run(&tx).await?;
    drop(tx);
    let _ = reporter.await;

    if json {
        print_json(&result)?;
    } else {
        print_summary(&result);
    }

    Ok(())
}

fn print_json(result: &SpeedTestResult) -> Result<(), GaugeError> {
    let encode = |error: serde_json::Error| {
        GaugeError::new(errors::ErrorKind::Unknown, "failed to encode result")
            .with_source(error)
    };

    let mut document = serde_json::to_value(result).map_err(encode)?;
    document["quality"] =
        serde_json::to_value(result.quality()).map_err(encode)?;

    println!("{}", serde_json::to_string_pretty(&document).map_err(encode)?);
    Ok(())
}

fn print_summary(result: &SpeedTestResult) {
    let quality = result.quality();

    println!(
        "{} {}",
        "Server:".bold().white(),
        result.server_label.bright_blue()
    );
    println!(
        "{} {:.1} ms{}",
        "Ping:".bold().white(),
        result.ping_ms,
        estimate_marker(&result.provenance.ping)
    );
    println!(
        "{} {:.1} ms{}",
        "Jitter:".bold().white(),
        result.jitter_ms,
        estimate_marker(&result.provenance.jitter)
    );
    println!(
        "{} {}{}",
        "Download:".bold().white(),
        format!("{:.2} Mbps", result.download_mbps).bright_cyan(),
        estimate_marker(&result.provenance.download)
    );
    println!(
        "{} {}{}",
        "Upload:".bold().white(),
        format!("{:.2} Mbps", result.upload_mbps).bright_cyan(),
        estimate_marker(&result.provenance.upload)
    );
    println!(
        "{} stability {:.0}, consistency {:.0}, reliability {:.0}",
        "Quality:".bold().white(),
        quality.stability,
        quality.consistency,
        quality.reliability
    );
    println!(
        "{} {}",
        "Grade:".bold().white(),
        result.grade.to_string().bright_green().bold()
    );
}

fn estimate_marker(provenance: &Provenance) -> &'static str {
    match provenance {
        Provenance::Measured => "",
        _ => " (estimated)",
    }
}
