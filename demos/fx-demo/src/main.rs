//! Cascade FX Demo
//!
//! Three currency pairs driven by geometric Brownian motion feed six
//! strategies, each reducing its pairs with a different decision
//! function. A trader prints the median of the strategies' latest
//! decisions on every update. While running:
//! - a seventh strategy over every pair is added
//! - GBPUSD is stopped and the median strategy removed
//! - everything is shut down

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cascade_decision::DecisionKind;
use cascade_runtime::{
    Aggregator, Consumer, ConsumerConfig, GbmConfig, GbmGenerator, Publisher, Source, SourceConfig,
    StdoutSink,
};

#[derive(Parser)]
#[command(name = "fx-demo")]
#[command(about = "Push-based FX strategy pipeline demo")]
struct Cli {
    /// Milliseconds between source ticks
    #[arg(long, default_value = "5000")]
    interval_ms: u64,

    /// Ticks per demo phase
    #[arg(long, default_value = "5")]
    cycle_ticks: u32,

    /// Seed for reproducible price paths
    #[arg(long)]
    seed: Option<u64>,

    /// Annualized volatility of every pair
    #[arg(long, default_value = "0.10")]
    volatility: f64,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

/// Pair id and starting price
const PAIRS: [(&str, f64); 3] = [("USDJPY", 155.69), ("GBPUSD", 1.36), ("EURUSD", 1.18)];

/// Strategy id, decision, followed pairs
const STRATEGIES: [(&str, &str, &[&str]); 6] = [
    ("sMean", "mean", &["USDJPY", "GBPUSD"]),
    ("sMedian", "median", &["GBPUSD", "EURUSD"]),
    ("sGeometric", "geometric_mean", &["USDJPY", "EURUSD"]),
    ("sTrimmed", "trimmed_mean:0.2", &["USDJPY", "GBPUSD", "EURUSD"]),
    ("sMaxSeen", "max_seen", &["USDJPY"]),
    ("sTrailingStop", "trailing_stop_sell", &["USDJPY"]),
];

fn find<'a>(sources: &'a [Source], id: &str) -> Option<&'a Source> {
    sources.iter().find(|s| s.id() == id)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SourceConfig::with_interval(Duration::from_millis(cli.interval_ms));
    config.validate()?;
    let cycle = config.interval * cli.cycle_ticks;

    info!(interval = ?config.interval, ?cycle, "demo started");

    let mut sources = Vec::with_capacity(PAIRS.len());
    for (i, (id, price)) in PAIRS.iter().enumerate() {
        let generator = GbmGenerator::new(GbmConfig {
            initial_price: *price,
            volatility: cli.volatility,
            drift: 0.0,
            seed: cli.seed.map(|seed| seed.wrapping_add(i as u64)),
        })?;
        sources.push(Source::new(*id, config.clone(), generator)?);
    }
    for source in &sources {
        source.start()?;
    }

    let mut strategies = Vec::with_capacity(STRATEGIES.len() + 1);
    for (id, method, upstream) in STRATEGIES {
        let strategy = Aggregator::from_kind(id, method.parse::<DecisionKind>()?)?;
        for pair in upstream {
            if let Some(source) = find(&sources, pair) {
                strategy.attach(source);
            }
        }
        strategies.push(strategy);
    }

    let trader = Consumer::new("Trader", ConsumerConfig::default(), Arc::new(StdoutSink));
    for strategy in &strategies {
        trader.attach(strategy);
    }

    tokio::time::sleep(cycle).await;

    let median_all = Aggregator::from_kind("S-E", DecisionKind::Median)?;
    for source in &sources {
        median_all.attach(source);
    }
    trader.attach(&median_all);
    strategies.push(median_all);
    info!(strategy = "S-E", "added strategy over every pair");

    tokio::time::sleep(cycle).await;

    info!("stopping GBPUSD and removing sMedian");
    if let Some(source) = find(&sources, "GBPUSD") {
        source.stop().await;
    }
    if let Some(pos) = strategies.iter().position(|s| s.id() == "sMedian") {
        let strategy = strategies.remove(pos);
        strategy.shutdown();
        trader.detach(&strategy);
    }

    tokio::time::sleep(cycle).await;

    info!("shutting down remaining components");
    for strategy in &strategies {
        strategy.shutdown();
    }
    trader.shutdown();
    for source in &sources {
        source.stop().await;
    }

    let stats = trader.stats();
    info!(
        reports = stats.reports,
        updates = stats.updates,
        fallbacks = stats.fallbacks,
        "demo finished"
    );
    Ok(())
}
