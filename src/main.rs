//! pulsevisor binary: adaptive clock multiplier on a Redis (or in-memory) bus.
//!
//! Reads `pulsevisor.toml` (see [`pulsevisor::Settings`]), applies command-line
//! overrides, then runs until SIGINT/SIGTERM or a fatal bus error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pulsevisor::settings::{Backend, RateList, Settings, StringList};
use pulsevisor::{BusRef, LogWriter, MemoryBus, Subscribe, SupervisorBuilder};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Learns the period of trigger channels and republishes N evenly spaced pulses per period"
)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "pulsevisor.toml")]
    config: PathBuf,

    /// Source channel (repeatable); replaces `clock.channel`
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Multiplier (repeatable); replaces `clock.rate`
    #[arg(long = "rate")]
    rates: Vec<u32>,

    /// Interval smoothing factor in [0, 1]; replaces `clock.learning_rate`
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Redis URL; replaces `bus.hostname` / `bus.port`
    #[arg(long)]
    redis_url: Option<String>,

    /// Debug logging and periodic pulse-count report
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if !self.channels.is_empty() {
            settings.clock.channel = StringList::List(self.channels.clone());
        }
        if !self.rates.is_empty() {
            let rates = self.rates.iter().map(|&r| i64::from(r)).collect();
            settings.clock.rate = RateList::List(rates);
        }
        if let Some(lr) = self.learning_rate {
            settings.clock.learning_rate = lr;
        }
        if self.debug && settings.general.debug == 0 {
            settings.general.debug = 1;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.debug { "pulsevisor=debug" } else { "pulsevisor=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    let bus = connect(&settings, cli.redis_url.as_deref()).await?;
    let multipliers = settings.multipliers()?;

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let mut sup = SupervisorBuilder::new(settings.runtime_config(), bus)
        .with_channels(settings.channels())
        .with_multipliers(multipliers)
        .with_subscribers(subscribers)
        .build()
        .context("Invalid configuration")?;

    tracing::info!(tasks = sup.keys().len(), "Starting pulsevisor");
    if let Err(err) = sup.run().await {
        tracing::error!(err = %err, "pulsevisor stopped with an error");
        return Err(err).context("pulsevisor failed");
    }
    tracing::info!(pulses = sup.pulse_count(), "pulsevisor stopped");
    Ok(())
}

async fn connect(settings: &Settings, redis_url: Option<&str>) -> Result<BusRef> {
    match settings.bus.backend()? {
        Backend::Memory => {
            tracing::warn!("using the in-memory bus; nothing outside this process can publish");
            Ok(Arc::new(MemoryBus::default()))
        }
        #[cfg(feature = "redis")]
        Backend::Redis => {
            let url = redis_url
                .map(str::to_string)
                .unwrap_or_else(|| settings.bus.redis_url());
            let bus = pulsevisor::RedisBus::connect(&url)
                .await
                .with_context(|| format!("Cannot connect to redis at {url}"))?;
            tracing::info!(url = %url, "connected to redis");
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis => {
            let _ = redis_url;
            Err(pulsevisor::ConfigError::UnsupportedBackend {
                backend: settings.bus.backend.clone(),
            })
            .context("pulsevisor was built without the `redis` feature")
        }
    }
}
