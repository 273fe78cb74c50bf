//! ==============================================================================
//! main.rs - soil agent entry point
//! ==============================================================================
//!
//! purpose:
//!     field-side agent for a modbus rtu soil sensor. it reads moisture and
//!     temperature, serves them on a small dashboard, and relays them to a
//!     remote document store while someone holds a session on the device.
//!
//! responsibilities:
//!     - parse cli arguments, load configuration, install logging
//!     - work out the device identity and the serial port
//!     - wire the channel, session policy, journal and telemetry together
//!     - run the web server in the background and the acquisition loop in
//!       the foreground
//!
//! architecture:
//!
//!     ┌────────────────────────────────────────────────────────────┐
//!     │                      soil agent (this file)                │
//!     │  ┌──────────────────┐             ┌──────────────────────┐ │
//!     │  │ acquisition loop │   status    │ web server           │ │
//!     │  │ (5s tick)        │ ──────────> │ (port 2000)          │ │
//!     │  └───┬─────────┬────┘ <────────── └──────────────────────┘ │
//!     │      │         │        enabled                            │
//!     │      ▼         ▼                                           │
//!     │  ┌────────┐ ┌────────────────────┐                         │
//!     │  │channel │ │ session/telemetry  │                         │
//!     │  └───┬────┘ └─────────┬──────────┘                         │
//!     └──────┼────────────────┼────────────────────────────────────┘
//!            │ modbus rtu     │ https
//!            ▼                ▼
//!      ┌──────────┐    ┌──────────────┐
//!      │  sensor  │    │ remote store │
//!      └──────────┘    └──────────────┘
//!
//! modes:
//!     - remote:     [remote].base_url is set. the device is leased through
//!                   the session collection and readings are uploaded.
//!     - standalone: no base_url, or --standalone. always valid for a fixed
//!                   local owner; readings stay on the dashboard and journal.
//!
//! ==============================================================================

mod acquisition;
mod channel;
mod codec;
mod config;
mod domain;
mod hal;
mod journal;
mod server;
mod session;
mod status;
mod store;
mod telemetry;

use acquisition::{Acquisition, Timings};
use anyhow::{bail, Result};
use channel::InstrumentChannel;
use clap::Parser;
use config::AgentConfig;
use domain::{DeviceId, PortId};
use session::{RemoteSessions, SessionPolicy, StandaloneSession};
use status::SharedStatus;
use std::path::PathBuf;
use std::sync::Arc;
use store::HttpDocumentStore;
use telemetry::{Binding, Telemetry};
use tracing_subscriber::EnvFilter;

const DEFAULT_OWNER: &str = "local";
const DEFAULT_SCOPE: &str = "default";

#[derive(Parser, Debug)]
#[command(
    name = "soil-agent",
    version,
    about = "Soil sensor acquisition agent with session management"
)]
struct Args {
    /// Path to the TOML config (default: config/agent.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the derived device id
    #[arg(long)]
    device_id: Option<String>,

    /// Claim the device for this owner while nobody holds it
    #[arg(long)]
    owner: Option<String>,

    /// Scope (field) to claim with --owner
    #[arg(long)]
    scope: Option<String>,

    /// Serial port, skips auto-discovery
    #[arg(long)]
    port: Option<String>,

    /// Ignore [remote] and run without leases or uploads
    #[arg(long)]
    standalone: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("===========================================================");
    println!("  Soil Agent v{}", env!("CARGO_PKG_VERSION"));
    println!("  moisture + temperature over modbus rtu");
    println!("===========================================================");

    // step 1: configuration (printed, logging is not up yet)
    let config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::load_or_default(),
    };
    config.print_summary();

    // step 2: logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: identity and port
    let device = match args.device_id.clone().or_else(|| config.identity.device_id.clone()) {
        Some(id) => DeviceId::new(id),
        None => hal::derive_device_id(&config.identity.prefix),
    };
    tracing::info!("device id: {}", device);

    let port = match args.port.clone().or_else(|| config.serial.port.clone()) {
        Some(port) => PortId::new(port),
        None => match hal::find_port(&config.serial).await {
            Some(port) => port,
            None => bail!("no sensor found on any serial port; pass --port to choose one"),
        },
    };
    tracing::info!("using port {}", port);

    // step 4: shared state and hardware channel
    let status = SharedStatus::new();
    let line = hal::LineSettings::from_config(&config.serial);
    let connector = Arc::new(hal::RtuConnector::new(line));
    let channel = Arc::new(InstrumentChannel::new(
        connector,
        config.polling.settle(),
        config.polling.inter_read(),
    ));

    // step 5: session policy and uploads
    let claim = claim_credentials(&args, &config);
    let remote = if args.standalone {
        None
    } else {
        HttpDocumentStore::from_config(&config.remote)?
    };

    let (sessions, telemetry): (Arc<dyn SessionPolicy>, Option<Telemetry>) = match remote {
        Some(store) => {
            let store = Arc::new(store);
            let sessions: Arc<dyn SessionPolicy> = Arc::new(RemoteSessions::new(
                store.clone(),
                config.remote.sessions_collection.clone(),
                config.remote.waiting_collection.clone(),
                chrono::Duration::minutes(config.session.timeout_minutes),
            ));
            let telemetry = Telemetry::new(
                store,
                config.remote.readings_collection.clone(),
                config.remote.history_subcollection.clone(),
            );
            (sessions, Some(telemetry))
        }
        None => {
            let binding = claim.clone().unwrap_or_else(|| Binding {
                owner: DEFAULT_OWNER.to_string(),
                scope: DEFAULT_SCOPE.to_string(),
            });
            tracing::info!("standalone mode: owner={}, field={}", binding.owner, binding.scope);
            let sessions: Arc<dyn SessionPolicy> =
                Arc::new(StandaloneSession::new(binding.owner, binding.scope));
            (sessions, None)
        }
    };

    let mut acquisition = Acquisition::new(
        device,
        port,
        channel,
        sessions,
        status.clone(),
        Timings::from(&config.polling),
    )
    .show_readings(config.logging.show_sensor_data);

    if let Some(telemetry) = telemetry {
        acquisition = acquisition.with_telemetry(telemetry);
        if let Some(binding) = claim {
            acquisition = acquisition.with_auto_claim(binding);
        }
    }

    if config.journal.enabled {
        match journal::Journal::open(config.journal.path.clone()).await {
            Ok(journal) => {
                tracing::info!("logging readings to {}", journal.path().display());
                acquisition = acquisition.with_journal(journal);
            }
            Err(e) => tracing::error!("csv journal disabled: {:#}", e),
        }
    }

    // step 6: web server in the background
    let bind = config.server.bind.clone();
    let web_status = status.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_server(&bind, web_status).await {
            tracing::error!("web server error: {:#}", e);
        }
    });

    // step 7: acquisition in the foreground until ctrl-c
    tokio::select! {
        _ = acquisition.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

/// owner/scope from cli, then config; only complete pairs count
fn claim_credentials(args: &Args, config: &AgentConfig) -> Option<Binding> {
    let owner = args.owner.clone().or_else(|| config.session.owner.clone())?;
    let scope = args.scope.clone().or_else(|| config.session.scope.clone())?;
    Some(Binding { owner, scope })
}
