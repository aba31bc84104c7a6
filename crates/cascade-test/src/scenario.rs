//! Topology scenarios
//!
//! Scenarios that exercise a whole pipeline:
//! - Topology: hand-driven sources, named strategies and one trader,
//!   with helpers for adding and removing nodes while it runs
//! - The FX demo wiring (three currency pairs, six strategies)
//! - A timed single-source run driven by a real `Source`

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cascade_core::{CascadeError, CascadeResult};
use cascade_decision::DecisionKind;
use cascade_runtime::{
    Aggregator, AggregatorStats, Consumer, ConsumerConfig, ConsumerStats, MedianReport, Publisher,
    SequenceGenerator, Source, SourceConfig, SourceStats,
};

use crate::harness::{ManualPublisher, RecordingSink};

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Sources, strategies and a single trader, driven by hand
pub struct Topology {
    sources: Vec<ManualPublisher>,
    strategies: Vec<Aggregator>,
    trader: Consumer,
    sink: Arc<RecordingSink>,
}

impl Topology {
    pub fn new() -> Self {
        let sink = RecordingSink::new();
        let trader = Consumer::new("Trader", ConsumerConfig::default(), sink.clone());
        Topology {
            sources: Vec::new(),
            strategies: Vec::new(),
            trader,
            sink,
        }
    }

    pub fn add_source(&mut self, id: &str) -> &ManualPublisher {
        let index = self.sources.len();
        self.sources.push(ManualPublisher::new(id));
        &self.sources[index]
    }

    /// Drop a source; strategies keep its last value until detached
    pub fn remove_source(&mut self, id: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id() != id);
        self.sources.len() != before
    }

    pub fn source(&self, id: &str) -> Option<&ManualPublisher> {
        self.sources.iter().find(|s| s.id() == id)
    }

    /// Create a strategy over `upstream` and attach it to the trader
    pub fn add_strategy(
        &mut self,
        id: &str,
        kind: DecisionKind,
        upstream: &[&str],
    ) -> CascadeResult<Aggregator> {
        let strategy = Aggregator::from_kind(id, kind)?;
        for source_id in upstream {
            let source = self
                .source(source_id)
                .ok_or_else(|| CascadeError::Config(format!("unknown source {source_id}")))?;
            strategy.attach(source);
        }
        self.trader.attach(&strategy);
        self.strategies.push(strategy.clone());
        Ok(strategy)
    }

    /// Shut a strategy down and detach it from the trader
    pub fn remove_strategy(&mut self, id: &str) -> bool {
        let Some(pos) = self.strategies.iter().position(|s| s.id() == id) else {
            return false;
        };
        let strategy = self.strategies.remove(pos);
        strategy.shutdown();
        self.trader.detach(&strategy);
        true
    }

    pub fn strategy(&self, id: &str) -> Option<&Aggregator> {
        self.strategies.iter().find(|s| s.id() == id)
    }

    pub fn emit(&self, id: &str, value: f64) -> bool {
        match self.source(id) {
            Some(source) => {
                source.emit(value);
                true
            }
            None => false,
        }
    }

    /// Emit one value per source, in source order
    pub fn tick(&self, values: &[f64]) {
        for (source, value) in self.sources.iter().zip(values) {
            source.emit(*value);
        }
    }

    /// Emit a random walk step on every source
    pub fn tick_random(&self, rng: &mut StdRng, base: &[f64]) {
        for (source, price) in self.sources.iter().zip(base) {
            let step: f64 = rng.gen_range(-0.01..0.01);
            source.emit(price * (1.0 + step));
        }
    }

    /// Shut down every strategy and the trader
    pub fn shutdown(&mut self) {
        for strategy in self.strategies.drain(..) {
            strategy.shutdown();
        }
        self.trader.shutdown();
    }

    pub fn trader(&self) -> &Consumer {
        &self.trader
    }

    pub fn sink(&self) -> &RecordingSink {
        &self.sink
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.id().to_string()).collect()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FX DEMO WIRING
// ============================================================================

/// Currency pairs and their starting prices
pub const FX_PAIRS: [(&str, f64); 3] = [("USDJPY", 155.69), ("GBPUSD", 1.36), ("EURUSD", 1.18)];

/// Strategy wiring of the FX demo: id, decision, followed pairs
pub fn fx_strategies() -> Vec<(&'static str, DecisionKind, Vec<&'static str>)> {
    vec![
        ("sMean", DecisionKind::Mean, vec!["USDJPY", "GBPUSD"]),
        ("sMedian", DecisionKind::Median, vec!["GBPUSD", "EURUSD"]),
        ("sGeometric", DecisionKind::GeometricMean, vec!["USDJPY", "EURUSD"]),
        (
            "sTrimmed",
            DecisionKind::TrimmedMean { trim_fraction: 0.2 },
            vec!["USDJPY", "GBPUSD", "EURUSD"],
        ),
        ("sMaxSeen", DecisionKind::MaxSeen, vec!["USDJPY"]),
        (
            "sTrailingStop",
            DecisionKind::TrailingStopSell { stop_distance: 0.001 },
            vec!["USDJPY"],
        ),
    ]
}

/// Hand-driven topology wired like the FX demo
pub fn fx_topology() -> CascadeResult<Topology> {
    let mut topology = Topology::new();
    for (id, _) in FX_PAIRS {
        topology.add_source(id);
    }
    for (id, kind, upstream) in fx_strategies() {
        topology.add_strategy(id, kind, &upstream)?;
    }
    Ok(topology)
}

/// Starting prices of the FX pairs, in source order
pub fn fx_prices() -> Vec<f64> {
    FX_PAIRS.iter().map(|(_, price)| *price).collect()
}

/// Deterministic RNG for randomized scenarios
pub fn scenario_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

// ============================================================================
// TIMED PIPELINE
// ============================================================================

/// Outcome of a timed single-source run
#[derive(Clone, Debug)]
pub struct TimedRun {
    pub reports: Vec<MedianReport>,
    pub source: SourceStats,
    pub aggregator: AggregatorStats,
    pub consumer: ConsumerStats,
}

impl TimedRun {
    pub fn medians(&self) -> Vec<f64> {
        self.reports.iter().map(|r| r.median).collect()
    }
}

/// Run `Source -> Aggregator -> Consumer` for exactly one tick per value.
///
/// Must be called inside a tokio runtime; with paused time the run is
/// deterministic.
pub async fn run_timed_pipeline(
    values: Vec<f64>,
    kind: DecisionKind,
    interval: Duration,
) -> CascadeResult<TimedRun> {
    let ticks = u32::try_from(values.len())
        .map_err(|_| CascadeError::Config("too many scripted values".to_string()))?;
    let generator = SequenceGenerator::new(values)?;
    let source = Source::new("G1", SourceConfig::with_interval(interval), generator)?;
    let strategy = Aggregator::from_kind("S1", kind)?;
    let sink = RecordingSink::new();
    let trader = Consumer::new("Trader", ConsumerConfig::default(), sink.clone());

    strategy.attach(&source);
    trader.attach(&strategy);

    source.start()?;
    // First tick fires immediately; stop halfway through the last interval
    tokio::time::sleep(interval * (ticks - 1) + interval / 2).await;
    source.stop().await;

    strategy.shutdown();
    trader.shutdown();

    Ok(TimedRun {
        reports: sink.reports(),
        source: source.stats(),
        aggregator: strategy.stats(),
        consumer: trader.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{failing_callback, panicking_callback, Recorder};
    use cascade_core::NodeId;
    use proptest::prelude::*;

    #[test]
    fn test_fx_topology_wiring() {
        let topology = fx_topology().unwrap();

        assert_eq!(topology.trader().attached_ids().len(), 6);
        assert_eq!(topology.source("USDJPY").unwrap().subscriber_count(), 5);
        assert_eq!(topology.source("GBPUSD").unwrap().subscriber_count(), 3);
        assert_eq!(topology.source("EURUSD").unwrap().subscriber_count(), 3);
        assert_eq!(
            topology.strategy("sTrimmed").unwrap().decision_name(),
            "trimmed_mean"
        );
    }

    #[test]
    fn test_fx_churn() {
        let mut topology = fx_topology().unwrap();
        let mut rng = scenario_rng(7);
        let prices = fx_prices();

        for _ in 0..3 {
            topology.tick_random(&mut rng, &prices);
        }
        assert_eq!(topology.sink().last().unwrap().count, 6);

        topology
            .add_strategy("S-E", DecisionKind::Median, &["USDJPY", "GBPUSD", "EURUSD"])
            .unwrap();
        topology.tick_random(&mut rng, &prices);
        assert_eq!(topology.sink().last().unwrap().count, 7);
        assert_eq!(topology.source("USDJPY").unwrap().subscriber_count(), 6);

        assert!(topology.remove_source("GBPUSD"));
        assert!(topology.remove_strategy("sMedian"));
        assert!(!topology.remove_strategy("sMedian"));
        // sMedian followed EURUSD; its subscription went with the shutdown
        assert_eq!(topology.source("EURUSD").unwrap().subscriber_count(), 3);

        topology.tick_random(&mut rng, &[prices[0], prices[2]]);
        let last = topology.sink().last().unwrap();
        assert_eq!(last.count, 6);
        assert!(!topology
            .trader()
            .attached_ids()
            .contains(&NodeId::from("sMedian")));

        let before = topology.sink().len();
        topology.shutdown();
        topology.tick_random(&mut rng, &[prices[0], prices[2]]);
        assert_eq!(topology.sink().len(), before);
        assert_eq!(topology.source("USDJPY").unwrap().subscriber_count(), 0);
    }

    #[test]
    fn test_shutdown_silences_downstream() {
        let mut topology = Topology::new();
        topology.add_source("G1");
        let strategy = topology.add_strategy("S1", DecisionKind::Mean, &["G1"]).unwrap();
        let recorder = Recorder::new();
        recorder.follow(&strategy);

        topology.emit("G1", 1.0);
        strategy.shutdown();
        topology.emit("G1", 2.0);
        topology.emit("G1", 3.0);

        assert_eq!(recorder.values(), vec![1.0]);
        assert_eq!(topology.sink().medians(), vec![1.0]);
    }

    #[test]
    fn test_misbehaving_subscribers_are_isolated() {
        let mut topology = Topology::new();
        topology.add_source("G1");
        let strategy = Aggregator::from_kind("S1", DecisionKind::Mean).unwrap();
        strategy.subscribe_callback(failing_callback("broken subscriber"));
        strategy.subscribe_callback(panicking_callback());
        strategy.attach(topology.source("G1").unwrap());
        topology.trader().attach(&strategy);

        topology.emit("G1", 4.0);
        topology.emit("G1", 6.0);

        assert_eq!(topology.sink().medians(), vec![4.0, 6.0]);
        assert_eq!(strategy.stats().callback_failures, 4);
    }

    #[test]
    fn test_reattach_drops_old_contribution() {
        let mut topology = Topology::new();
        topology.add_source("A");
        topology.add_source("B");
        let strategy = topology
            .add_strategy("sMax", DecisionKind::MaxSeen, &["A", "B"])
            .unwrap();
        let recorder = Recorder::new();
        recorder.follow(&strategy);

        topology.emit("A", 100.0);
        topology.emit("B", 1.0);

        strategy.detach_id("A");
        strategy.attach(topology.source("A").unwrap());
        assert_eq!(strategy.cached_values(), vec![(NodeId::from("B"), 1.0)]);

        topology.emit("B", 2.0);
        assert_eq!(recorder.last_value(), Some(100.0));
        assert_eq!(strategy.cached_values(), vec![(NodeId::from("B"), 2.0)]);
    }

    #[test]
    fn test_trailing_stop_sell_signal_reaches_trader() {
        let mut topology = Topology::new();
        topology.add_source("G1");
        topology
            .add_strategy(
                "sStop",
                DecisionKind::TrailingStopSell { stop_distance: 1.0 },
                &["G1"],
            )
            .unwrap();

        for value in [10.0, 11.0, 11.5, 11.0, 10.0, 8.0] {
            topology.emit("G1", value);
        }
        assert_eq!(
            topology.sink().medians(),
            vec![9.0, 10.0, 10.5, 10.5, f64::NEG_INFINITY, 7.0]
        );
    }

    #[test]
    fn test_report_lines() {
        let mut topology = Topology::new();
        topology.add_source("G1");
        topology.add_strategy("S1", DecisionKind::Mean, &["G1"]).unwrap();
        topology.emit("G1", 1.5);

        let lines = topology.sink().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("] Trader median across 1 strategies: 1.500000"));
    }

    #[test]
    fn test_unknown_source_is_config_error() {
        let mut topology = Topology::new();
        let result = topology.add_strategy("S1", DecisionKind::Mean, &["missing"]);
        assert!(matches!(result, Err(CascadeError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_end_to_end() {
        let run = run_timed_pipeline(vec![10.0, 20.0], DecisionKind::Mean, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(run.medians(), vec![10.0, 20.0]);
        assert_eq!(run.source.ticks, 2);
        assert_eq!(run.aggregator.recomputations, 2);
        assert_eq!(run.consumer.reports, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_max_seen() {
        let run = run_timed_pipeline(
            vec![3.0, 1.0, 4.0, 1.0, 5.0],
            DecisionKind::MaxSeen,
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert_eq!(run.medians(), vec![3.0, 3.0, 4.0, 4.0, 5.0]);
    }

    proptest! {
        #[test]
        fn prop_trader_reports_median_of_strategies(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..12)
        ) {
            let mut topology = Topology::new();
            for (i, value) in values.iter().enumerate() {
                let id = format!("G{i}");
                topology.add_source(&id);
                topology
                    .add_strategy(&format!("S{i}"), DecisionKind::Mean, &[id.as_str()])
                    .unwrap();
                topology.emit(&id, *value);
            }

            let expected = cascade_decision::median(&values).unwrap();
            let last = topology.sink().last().unwrap();
            prop_assert_eq!(last.count, values.len());
            prop_assert!((last.median - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }
    }
}
