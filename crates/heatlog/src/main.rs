use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use heatlog::Config;
use heatlog::DeviceTable;
use heatlog::Selector;
use heatlog::SnapshotService;
use heatlog::api;
use heatlog::poll;
use heatlog::salus::MappedDevice;
use heatlog::salus::PropertyKey;
use heatlog::salus::SalusClient;
use heatlog::service::status_line;
use heatlog::sheets::GoogleSheets;
use heatlog::sheets::ServiceAccountKey;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log Salus thermostat snapshots to a Google spreadsheet
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file; repeat to merge several (e.g. a secrets file)
    #[arg(short, long = "config", default_value = "heatlog.toml")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the authenticated HTTP trigger
    Serve,
    /// Snapshot every device on a fixed interval
    Poll {
        /// Seconds between snapshots, overriding `[poll] interval_secs`
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print each device's temperature and heating state once
    Once {
        /// Also append the snapshot to the spreadsheet
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_files(&cli.config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("heatlog {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Loaded config from: {}",
        cli.config
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!(
        "Tracking {} devices, local time in {}",
        config.devices.len(),
        config.snapshot.timezone
    );

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Poll { interval } => {
            let interval = interval.unwrap_or(config.poll.interval_secs);
            anyhow::ensure!(interval > 0, "--interval must be positive");
            poll_forever(config, Duration::from_secs(interval)).await
        }
        Command::Once { write } => once(config, write).await,
    }
}

fn build_service(config: &Config) -> anyhow::Result<SnapshotService> {
    let sheets = config
        .sheets
        .as_ref()
        .context("[sheets] is required to write snapshots")?;
    let key = ServiceAccountKey::load(sheets)?;
    let sink = GoogleSheets::new(sheets, key)?;
    let client = SalusClient::new(&config.vendor).context("Failed to build vendor client")?;

    Ok(SnapshotService::new(
        client,
        Arc::new(sink),
        DeviceTable::from_config(&config.devices),
        config.snapshot.timezone,
        sheets.display_name(),
    ))
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate_for_serve()?;
    let service = Arc::new(build_service(&config)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(api::serve(
        config.api.listen.clone(),
        config.api.port,
        service,
        config.api.users.clone(),
        shutdown_rx,
    ));

    tokio::select! {
        result = server => {
            // The server only returns early when it failed to start.
            return result.context("HTTP API task panicked")?;
        }
        _ = wait_for_ctrl_c() => {}
    }

    // The receiver is gone if the server already stopped.
    shutdown_tx.send(()).ok();
    tracing::info!("heatlog stopped");
    Ok(())
}

async fn poll_forever(config: Config, interval: Duration) -> anyhow::Result<()> {
    let service = Arc::new(build_service(&config)?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let poller = tokio::spawn(poll::run(service, interval, shutdown_rx));

    wait_for_ctrl_c().await;
    shutdown_tx.send(()).ok();

    let cycles = poller.await.context("Poll task panicked")?;
    tracing::info!("heatlog stopped after {} poll cycles", cycles);
    Ok(())
}

async fn once(config: Config, write: bool) -> anyhow::Result<()> {
    if write {
        let service = build_service(&config)?;
        let mapped = service.fetch().await?;
        print_status(&mapped, service.client().properties(), &config);

        let written = service
            .snapshot_from(&Selector::All, &mapped)
            .await?
            .into_result()?;
        println!(
            "snapshot added to sheet {} ({} devices)",
            service.sheet_name(),
            written.len()
        );
    } else {
        let client = SalusClient::new(&config.vendor).context("Failed to build vendor client")?;
        let token = client.token().await?;
        let mapped = client.fetch_mapped_properties(&token).await?;
        print_status(&mapped, client.properties(), &config);
    }

    Ok(())
}

fn print_status(mapped: &[MappedDevice], properties: &[PropertyKey], config: &Config) {
    for device in mapped.iter().filter(|d| config.devices.contains_key(&d.name)) {
        match device.decode(properties) {
            Ok(record) => println!("{}", status_line(&record)),
            Err(e) => println!("{}: ERROR: UpstreamError {}", device.name, e),
        }
    }
}
