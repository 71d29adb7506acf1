//! SOS Relay command-line trigger
//!
//! Loads contacts and the emergency message from configuration, attaches the
//! current location when one is available, and sends the message to every
//! contact. Ctrl-C stops the run after the message currently being sent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use sos_common::{DispatchOutcome, Recipient};
use sos_config::{AppConfig, ConfigLoader, GatewaySettings};
use sos_dispatch::{
    CachedLocationProvider, CancellationToken, ContactBook, Dispatcher, DispatcherConfig,
    HttpSmsGateway, HttpSmsGatewayConfig, LocationProvider, LogMessagingCapability,
    MessagingCapability, NoLocationProvider, StaticLocationProvider,
};

#[derive(Parser, Debug)]
#[command(name = "sos-send")]
#[command(about = "Send an emergency SMS with your location to your emergency contacts")]
struct Cli {
    /// Configuration file (defaults to the standard search paths)
    #[arg(long, short, env = "SOS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send to each contact in turn, pausing between messages
    Send(SendArgs),
    /// Send one message addressed to all contacts at once
    Broadcast(SendArgs),
    /// Print an example configuration file
    ExampleConfig,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Message to send instead of the configured emergency message
    #[arg(long, short)]
    message: Option<String>,

    /// Latitude to attach (requires --lon)
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude to attach (requires --lat)
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Log messages instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Override the pause between messages, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Sequential,
    Broadcast,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    sos_common::logging::init_logging("sos-send");

    match cli.command {
        Command::ExampleConfig => {
            print!("{}", AppConfig::example_toml());
            Ok(())
        }
        Command::Send(args) => run(cli.config, args, Mode::Sequential).await,
        Command::Broadcast(args) => run(cli.config, args, Mode::Broadcast).await,
    }
}

async fn run(config_path: Option<PathBuf>, args: SendArgs, mode: Mode) -> Result<()> {
    let loader = match config_path {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    if args.dry_run {
        config.gateway.kind = "log".to_string();
    }
    if let Some(ms) = args.delay_ms {
        config.dispatch.inter_message_delay_ms = ms;
    }
    config.validate()?;

    let contacts = config
        .contacts
        .iter()
        .map(|c| Recipient::new(&c.id, &c.name, &c.phone))
        .collect();
    let mut book = ContactBook::new(contacts, config.message.emergency_message.clone())?;
    if let Some(message) = args.message {
        book.update_emergency_message(message)?;
    }

    if book.is_empty() {
        bail!("No contacts: please add emergency contacts first");
    }

    let messaging = build_messaging(&config.gateway)?;

    let location = Arc::new(CachedLocationProvider::new(
        build_location(&config, args.lat.zip(args.lon)),
        config.dispatch.location_prefetch_timeout(),
    ));
    match location.prefetch().await {
        Ok(_) => info!(status = %location.status(), "Location ready"),
        Err(_) => warn!(
            status = %location.status(),
            "Could not get your current location, the message may be sent without location information"
        ),
    }

    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            inter_message_delay: config.dispatch.inter_message_delay(),
            location_timeout: config.dispatch.location_timeout(),
            maps_base_url: config.dispatch.maps_base_url.clone(),
        },
        messaging,
        location,
    );

    let request = book.request(None);
    info!(
        contacts = request.recipients.len(),
        mode = ?mode,
        "Sending emergency messages"
    );

    let outcome = match mode {
        Mode::Sequential => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_interrupt(cancel.clone()));

            dispatcher
                .dispatch_with_cancel(&request, &cancel, |progress| {
                    info!(
                        sent = progress.sent_so_far,
                        total = progress.total,
                        "Sending messages..."
                    );
                })
                .await?
        }
        Mode::Broadcast => dispatcher.broadcast(&request).await?,
    };

    report(&outcome, args.json)?;

    if !outcome.summary().any_sent() {
        bail!("no emergency message was sent");
    }
    Ok(())
}

fn build_messaging(gateway: &GatewaySettings) -> Result<Arc<dyn MessagingCapability>> {
    match gateway.kind.as_str() {
        "log" => {
            info!("Dry run: messages will be logged, not sent");
            Ok(Arc::new(LogMessagingCapability::new()))
        }
        _ => {
            let config = HttpSmsGatewayConfig::new(&gateway.url)
                .with_health_path(&gateway.health_path)
                .with_auth_token(&gateway.auth_token)
                .with_sender_id(&gateway.sender_id)
                .with_timeout(gateway.timeout());
            Ok(Arc::new(HttpSmsGateway::new(config)?))
        }
    }
}

/// Command-line coordinates win over configured ones.
fn build_location(config: &AppConfig, cli: Option<(f64, f64)>) -> Arc<dyn LocationProvider> {
    match cli.or_else(|| config.location.coordinates()) {
        Some((lat, lon)) => Arc::new(StaticLocationProvider::new(lat, lon)),
        None => Arc::new(NoLocationProvider),
    }
}

fn report(outcome: &DispatchOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    let summary = outcome.summary();
    println!("{}: {}", summary.title(), summary.message());
    if outcome.cancelled {
        println!(
            "Sending was interrupted; {} contact(s) were not messaged.",
            outcome.skipped_count
        );
    }
    for result in &outcome.results {
        println!("  {:<20} {}", result.name, result.outcome);
    }
    Ok(())
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, stopping after the current message");
        cancel.cancel();
    }
}
