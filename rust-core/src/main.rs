//! Crash Sentinel CLI
//!
//! Drives the monitor with console host adapters: accelerometer samples come
//! from a CSV file (or a simulated crash), the location is fixed on the
//! command line, and the emergency text is printed instead of sent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crash_sentinel::capabilities::{
    LocationPriority, LocationProvider, MessageSender, PermissionGate, SensorSource,
};
use crash_sentinel::{
    spawn_monitor, Capability, HostCapabilities, LocationError, LocationFix, MonitorHandle,
    MonitorStatus, Sample, SendError, SentinelConfig, SentinelError,
};

#[derive(Parser)]
#[command(name = "crash-sentinel")]
#[command(version)]
#[command(about = "Crash-detection safety monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emergency contact, overrides the configuration file
    #[arg(long, global = true)]
    contact: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded accelerometer samples (timestamp_ms,x,y,z per line)
    Replay {
        /// CSV file with samples
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Start an alert without an impact
    Simulate {
        #[command(flatten)]
        host: HostArgs,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,

    /// Print version information
    Version,
}

#[derive(Args)]
struct HostArgs {
    /// Latitude reported by the location provider
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Longitude reported by the location provider
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Press cancel this many seconds into the countdown
    #[arg(long)]
    cancel_after: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.contact)?;

    match cli.command {
        Commands::Replay { input, host } => {
            let samples = read_samples(&input)?;
            tracing::info!(count = samples.len(), path = %input.display(), "Replaying samples");

            let monitor = spawn_monitor(&config, console_host(&host));
            monitor.enable().await?;
            for sample in samples {
                monitor.push_sample(sample).await?;
            }
            finish(monitor, host.cancel_after).await?;
        }
        Commands::Simulate { host } => {
            let monitor = spawn_monitor(&config, console_host(&host));
            monitor.enable().await?;
            monitor.simulate().await?;
            finish(monitor, host.cancel_after).await?;
        }
        Commands::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("crash-sentinel {}", crash_sentinel::VERSION);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, contact: Option<String>) -> anyhow::Result<SentinelConfig> {
    let mut config = match path {
        Some(path) => SentinelConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SentinelConfig::default(),
    };
    if contact.is_some() {
        config.contact = contact;
    }
    Ok(config)
}

fn read_samples(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut samples = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            anyhow::bail!("line {}: expected 4 fields, got {}", index + 1, fields.len());
        }
        let Ok(timestamp_ms) = fields[0].parse::<u64>() else {
            // header row
            if index == 0 {
                continue;
            }
            anyhow::bail!("line {}: invalid timestamp {:?}", index + 1, fields[0]);
        };
        let mut accel = [0.0f32; 3];
        for (axis, field) in accel.iter_mut().zip(&fields[1..]) {
            *axis = field
                .parse()
                .with_context(|| format!("line {}: invalid value {:?}", index + 1, field))?;
        }
        samples.push(Sample::new(timestamp_ms, accel));
    }
    Ok(samples)
}

/// Wait for the alert to resolve, optionally canceling it first.
async fn finish(monitor: MonitorHandle, cancel_after: Option<u64>) -> anyhow::Result<()> {
    let mut status = monitor.subscribe();

    let current = monitor.flush().await?;
    if !matches!(current, MonitorStatus::Pending { .. }) {
        println!("{}", current);
        if current == MonitorStatus::Armed {
            println!("no impact detected");
        }
        monitor.shutdown().await?;
        return Ok(());
    }

    if let Some(secs) = cancel_after {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        if let Err(e) = monitor.cancel().await {
            tracing::warn!(error = %e, "Cancel rejected");
        }
    }

    let last = loop {
        let current = status.borrow_and_update().clone();
        if is_resolved(&current) {
            println!("{}", current);
            break current;
        }
        status.changed().await.context("monitor stopped unexpectedly")?;
    };

    monitor.shutdown().await?;
    match last {
        MonitorStatus::Failed { reason } => Err(SentinelError::SendFailure(reason).into()),
        MonitorStatus::MissingPermission(capability) => {
            Err(SentinelError::PermissionMissing(capability).into())
        }
        _ => Ok(()),
    }
}

fn is_resolved(status: &MonitorStatus) -> bool {
    matches!(
        status,
        MonitorStatus::Canceled
            | MonitorStatus::Sent
            | MonitorStatus::Failed { .. }
            | MonitorStatus::MissingPermission(_)
            | MonitorStatus::InvalidContact
    )
}

// ============================================================================
// CONSOLE HOST
// ============================================================================

fn console_host(args: &HostArgs) -> HostCapabilities {
    let fix = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(LocationFix::new(lat, lon)),
        _ => None,
    };
    HostCapabilities {
        sensor: Box::new(ConsoleSensor),
        location: Arc::new(ConsoleLocation { fix }),
        sender: Arc::new(ConsoleSender),
        permissions: Arc::new(ConsolePermissions),
    }
}

struct ConsoleSensor;

impl SensorSource for ConsoleSensor {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self) {
        tracing::debug!("Sensor delivery started");
    }

    fn stop(&mut self) {
        tracing::debug!("Sensor delivery stopped");
    }
}

struct ConsoleLocation {
    fix: Option<LocationFix>,
}

impl LocationProvider for ConsoleLocation {
    fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        Ok(self.fix)
    }

    fn fresh_fix(&self, _priority: LocationPriority) -> Result<Option<LocationFix>, LocationError> {
        self.fix.map(Some).ok_or(LocationError::Disabled)
    }
}

struct ConsoleSender;

impl MessageSender for ConsoleSender {
    fn send(&self, recipient: &str, body: &str) -> Result<(), SendError> {
        println!("SMS to {}: {}", recipient, body);
        Ok(())
    }
}

struct ConsolePermissions;

impl PermissionGate for ConsolePermissions {
    fn has(&self, _capability: Capability) -> bool {
        true
    }

    fn request(&self, _capabilities: &[Capability]) {}
}
