//! Aggregation simulator binary.
//!
//! Runs a line of sensor nodes over a lossy simulated radio, aggregating
//! readings toward the sink, and prints what the sink collected on exit.

use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;
mod sim;
mod workload;

use config::SimConfig;
use logging::AggLogFormatter;
use sim::Simulation;

/// In-network aggregation over a simulated sensor mesh
#[derive(Parser, Debug)]
#[command(name = "mesh-agg", version, about = "In-network aggregation over a simulated sensor mesh")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "mesh-agg.yaml")]
    config: PathBuf,

    /// Number of nodes, sink included
    #[arg(long)]
    nodes: Option<u16>,

    /// Per-attempt loss probability, e.g. 0.2
    #[arg(long)]
    loss: Option<f64>,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Disable the urgent sighting job
    #[arg(long)]
    no_detect: bool,

    /// Discovery round period, e.g. 1s
    #[arg(long)]
    beacon_interval: Option<humantime::Duration>,

    /// Sensing period, e.g. 500ms
    #[arg(long)]
    sow_interval: Option<humantime::Duration>,

    /// Nominal flush interval of each job, e.g. 10s
    #[arg(long)]
    flush_interval: Option<humantime::Duration>,

    /// Stop after this long, e.g. 2m (runs until Ctrl-C otherwise)
    #[arg(long)]
    duration: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Layer command line flags over the loaded configuration
    fn apply(&self, config: &mut SimConfig) {
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(loss) = self.loss {
            config.loss = loss;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if self.no_detect {
            config.detect = false;
        }
        if let Some(interval) = self.beacon_interval {
            config.beacon_interval_ms = millis(interval);
        }
        if let Some(interval) = self.sow_interval {
            config.sow_interval_ms = millis(interval);
        }
        if let Some(interval) = self.flush_interval {
            config.flush_interval_ms = millis(interval);
        }
    }
}

fn millis(duration: humantime::Duration) -> u64 {
    u64::try_from(Duration::from(duration).as_millis()).unwrap_or(u64::MAX)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("warn");
    for target in ["mesh_agg", "mesh_routing", "mesh_storage", "mesh_session", "mesh_topology", "mesh_wire"] {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(AggLogFormatter::new("mesh-agg".to_string()))
        .init();

    info!("Starting mesh-agg v{}", env!("CARGO_PKG_VERSION"));

    let mut config = SimConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        component_error!("config", "Invalid configuration: {}", e);
        return Err(e);
    }

    info!(
        "Simulation config: nodes={}, loss={}, seed={:?}, flush_interval={:?}, max_payload={}",
        config.nodes,
        config.loss,
        config.seed,
        config.flush_interval(),
        config.tree.max_payload
    );

    let mut sim = Simulation::new(&config, Instant::now())?;

    let mut beacon = tokio::time::interval(config.beacon_interval());
    let mut sense = tokio::time::interval(config.sow_interval());
    let mut pump = tokio::time::interval(config.pump_interval());
    let mut stats = tokio::time::interval(config.stats_interval());

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration.into()).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = beacon.tick() => sim.discover(),
            _ = sense.tick() => sim.sense(),
            _ = pump.tick() => {
                sim.flush_due(Instant::now());
                sim.pump();
            }
            _ = stats.tick() => sim.log_stats(),
            _ = &mut deadline => {
                info!("Simulation duration elapsed");
                break;
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    sim.log_stats();
    let summary = sim.finish();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("mesh-agg shutdown complete");
    Ok(())
}
