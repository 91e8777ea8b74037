//! OpenAir - background air-quality acquisition.
//!
//! Run with: `cargo run -p openair-service`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::UtcOffset;
use time::macros::format_description;
use tracing::{info, warn};

use openair_core::{AirQualitySource, SingleInstanceGuard, SystemClock, WaqiClient};
use openair_service::{AppState, Config, Scheduler, SchedulerEvent, ShutdownSignal};
use openair_store::Store;
use openair_types::{LocationKey, RETENTION_WINDOW, Reading};

/// OpenAir - air-quality acquisition and hourly history.
#[derive(Parser, Debug)]
#[command(name = "openair")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// API token (overrides config and OPENAIR_TOKEN).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Place name or `lat,lon` to monitor (overrides config).
    #[arg(short, long, global = true)]
    location: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the acquisition loop in the foreground (default behavior).
    Run,

    /// Print the stored hourly history.
    History {
        /// How many hours back to show.
        #[arg(long, default_value_t = 24)]
        hours: u32,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Search monitoring stations by name.
    Search {
        /// Keyword to search for.
        keyword: String,
    },

    /// Print the location detected from this machine's IP address.
    Locate,

    /// Drop expired and duplicate rows from the database.
    Prune,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Must happen before any other thread exists.
    let offset = openair_store::local_offset();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("openair_service=info".parse()?)
                .add_directive("openair_core=info".parse()?)
                .add_directive("openair_store=info".parse()?),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let config = load_config(&args)?;
        match args.command {
            Some(Command::History { hours, json }) => show_history(&config, offset, hours, json),
            Some(Command::Search { keyword }) => search(&config, &keyword).await,
            Some(Command::Locate) => locate(&config).await,
            Some(Command::Prune) => prune(&config, offset),
            Some(Command::Run) | None => run(config, offset).await,
        }
    })
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };
    config.apply_env();

    // Override config with CLI args
    if let Some(token) = &args.token {
        config.api.token = token.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(location) = &args.location {
        config.location.query = Some(location.clone());
    }

    Ok(config)
}

fn open_store(config: &Config, offset: UtcOffset) -> anyhow::Result<Store> {
    info!("Opening database at {:?}", config.storage.path);
    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening {}", config.storage.path.display()))?;
    Ok(store.with_offset(offset))
}

fn client(config: &Config) -> anyhow::Result<WaqiClient> {
    config.validate()?;
    Ok(WaqiClient::new(
        &config.api.base_url,
        config.api.token.clone(),
        config.request_timeout(),
    )?)
}

async fn run(config: Config, offset: UtcOffset) -> anyhow::Result<()> {
    let mut guard = SingleInstanceGuard::new(&config.lock.path);
    if !guard.try_acquire() {
        println!("OpenAir is already running");
        return Ok(());
    }

    let result = run_scheduler(config, offset).await;
    guard.release();
    result
}

async fn run_scheduler(config: Config, offset: UtcOffset) -> anyhow::Result<()> {
    let client = client(&config)?;
    let store = open_store(&config, offset)?;

    let location = resolve_location(&config, &client).await?;
    info!("Monitoring {}", location);

    match store.maintain(RETENTION_WINDOW) {
        Ok(report) if report.total() > 0 => info!(
            "Startup maintenance removed {} expired and {} duplicate rows",
            report.pruned, report.deduplicated
        ),
        Ok(_) => {}
        Err(e) => warn!("Startup maintenance failed: {}", e),
    }

    let mut shutdown = ShutdownSignal::install().context("installing signal handlers")?;
    let state = AppState::new(store, config, location);
    let scheduler = Scheduler::new(state, Arc::new(client), Arc::new(SystemClock));
    let mut events = scheduler.subscribe();
    let handle = scheduler.start();

    loop {
        tokio::select! {
            signal = shutdown.recv() => {
                let name = signal.context("waiting for a shutdown signal")?;
                info!("Received {}, shutting down", name);
                break;
            }
            event = events.recv() => match event {
                Ok(SchedulerEvent::Updated(reading)) => print_reading(&reading, offset)?,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} scheduler events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop();
    if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
        warn!("Scheduler did not stop within 5s");
    }
    Ok(())
}

/// Configured location, else the IP-detected one, else the fallback name.
async fn resolve_location(config: &Config, client: &WaqiClient) -> anyhow::Result<LocationKey> {
    if let Some(key) = config.location_key()? {
        return Ok(key);
    }

    match client.locate_here().await {
        Ok(key) => Ok(key),
        Err(e) => {
            warn!(
                "Location detection failed ({}), using {}",
                e, config.location.fallback
            );
            Ok(LocationKey::parse(&config.location.fallback)?)
        }
    }
}

fn show_history(config: &Config, offset: UtcOffset, hours: u32, json: bool) -> anyhow::Result<()> {
    let store = open_store(config, offset)?;
    let window = time::Duration::hours(i64::from(hours)).min(RETENTION_WINDOW);
    let history = store.query_recent(window)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No readings in the last {} hours", window.whole_hours());
        return Ok(());
    }
    for reading in &history {
        print_reading(reading, offset)?;
    }
    Ok(())
}

fn print_reading(reading: &Reading, offset: UtcOffset) -> anyhow::Result<()> {
    let when = reading
        .timestamp
        .to_offset(offset)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))?;
    let pm25 = reading
        .pm25
        .map(|v| format!("{:.1}", v))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}  AQI {:>3}  PM2.5 {:>5}  {}",
        when, reading.aqi, pm25, reading.location_label
    );
    Ok(())
}

async fn search(config: &Config, keyword: &str) -> anyhow::Result<()> {
    let client = client(config)?;
    let stations = client.search(keyword).await?;
    if stations.is_empty() {
        println!("No stations match {:?}", keyword);
        return Ok(());
    }
    for station in stations {
        let aqi = station
            .aqi
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        match station.location_key() {
            Ok(key) => println!("{:>4}  {}  ({})", aqi, station.name, key),
            Err(_) => println!("{:>4}  {}", aqi, station.name),
        }
    }
    Ok(())
}

async fn locate(config: &Config) -> anyhow::Result<()> {
    let client = client(config)?;
    let key = client.locate_here().await?;
    println!("{}", key);
    // Show what the service would see there.
    let reading = client.fetch(&key).await?;
    println!("AQI {} at {}", reading.aqi, reading.location_label);
    Ok(())
}

fn prune(config: &Config, offset: UtcOffset) -> anyhow::Result<()> {
    let store = open_store(config, offset)?;
    let report = store.maintain(RETENTION_WINDOW)?;
    println!(
        "Removed {} expired and {} duplicate rows ({} remain)",
        report.pruned,
        report.deduplicated,
        store.count()?
    );
    Ok(())
}
