//! Periodic source
//!
//! State machine: `Idle -> Running -> Idle`. While running, a spawned task
//! produces one value per interval and notifies subscribers synchronously,
//! so a tick (including all downstream recomputation it triggers) finishes
//! before the next tick can start.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use cascade_core::{CascadeError, CascadeResult, NodeId, Timestamp};

use crate::{Broker, Callback, Publisher, Subscription, ValueGenerator};

/// Source configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Time between ticks
    pub interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            interval: Duration::from_secs(5),
        }
    }
}

impl SourceConfig {
    /// Short interval for demos and tests
    pub fn fast() -> Self {
        SourceConfig {
            interval: Duration::from_millis(100),
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        SourceConfig { interval }
    }

    pub fn validate(&self) -> CascadeResult<()> {
        if self.interval.is_zero() {
            return Err(CascadeError::InvalidInterval);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub ticks: u64,
    pub notifications: u64,
    pub callback_failures: u64,
    pub deferred: u64,
}

/// Stop request owned by exactly one spawned loop
#[derive(Default)]
struct StopSignal {
    raised: AtomicBool,
    wake: Notify,
}

impl StopSignal {
    fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

struct RunningTask {
    handle: JoinHandle<()>,
    stop: Arc<StopSignal>,
}

struct SourceInner {
    id: NodeId,
    config: SourceConfig,
    broker: Broker,
    generator: Mutex<Box<dyn ValueGenerator>>,
    last_value: Mutex<Option<f64>>,
    stats: Mutex<SourceStats>,
    task: Mutex<Option<RunningTask>>,
}

impl SourceInner {
    /// Produce one value and deliver it
    fn tick(&self) -> f64 {
        let timestamp = Timestamp::now();
        let value = self.generator.lock().next_value(self.config.interval);
        *self.last_value.lock() = Some(value);

        let report = self.broker.notify(value, timestamp);

        let mut stats = self.stats.lock();
        stats.ticks += 1;
        stats.notifications += report.delivered as u64;
        stats.callback_failures += report.failed as u64;
        stats.deferred += report.deferred as u64;
        value
    }

    async fn run(self: Arc<Self>, stop: Arc<StopSignal>) {
        tracing::info!(source = %self.id, interval = ?self.config.interval, "source running");

        while !stop.is_raised() {
            self.tick();

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = stop.wake.notified() => {}
            }
        }

        tracing::debug!(source = %self.id, "source loop exited");
    }
}

/// Periodic emitter at the base of a pipeline.
///
/// Cloning yields another handle to the same source.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

impl Source {
    pub fn new(
        id: impl Into<NodeId>,
        config: SourceConfig,
        generator: impl ValueGenerator + 'static,
    ) -> CascadeResult<Self> {
        Self::with_boxed_generator(id, config, Box::new(generator))
    }

    pub fn with_boxed_generator(
        id: impl Into<NodeId>,
        config: SourceConfig,
        generator: Box<dyn ValueGenerator>,
    ) -> CascadeResult<Self> {
        config.validate()?;
        let id = id.into();
        Ok(Source {
            inner: Arc::new(SourceInner {
                broker: Broker::new(id.clone()),
                id,
                config,
                generator: Mutex::new(generator),
                last_value: Mutex::new(None),
                stats: Mutex::new(SourceStats::default()),
                task: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.inner.config
    }

    /// Begin periodic emission. No-op while already running.
    ///
    /// The first value is emitted as soon as the task is scheduled.
    pub fn start(&self) -> CascadeResult<()> {
        let mut task = self.inner.task.lock();
        if let Some(existing) = task.as_ref() {
            if !existing.handle.is_finished() {
                return Ok(());
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CascadeError::RuntimeUnavailable)?;

        tracing::info!(
            source = %self.inner.id,
            interval = ?self.inner.config.interval,
            "source starting"
        );

        let stop = Arc::new(StopSignal::default());
        let handle = runtime.spawn(Arc::clone(&self.inner).run(Arc::clone(&stop)));
        *task = Some(RunningTask { handle, stop });
        Ok(())
    }

    /// Stop periodic emission and wait for the task to exit.
    ///
    /// Once this returns, the task that was running when it was called has
    /// exited. A `start` racing with `stop` spawns a fresh task, which this
    /// call neither signals nor waits for.
    pub async fn stop(&self) {
        let task = self.inner.task.lock().take();

        let Some(task) = task else {
            return;
        };
        task.stop.raise();
        if let Err(e) = task.handle.await {
            if e.is_panic() {
                tracing::warn!(source = %self.inner.id, "source task panicked");
            }
        }
        tracing::info!(source = %self.inner.id, "source stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Most recently emitted value
    pub fn last_value(&self) -> Option<f64> {
        *self.inner.last_value.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broker.len()
    }

    pub fn stats(&self) -> SourceStats {
        self.inner.stats.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn tick(&self) -> f64 {
        self.inner.tick()
    }
}

impl Publisher for Source {
    fn id(&self) -> &NodeId {
        &self.inner.id
    }

    fn subscribe_callback(&self, callback: Callback) -> Subscription {
        self.inner.broker.subscribe(callback)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.inner.id)
            .field("interval", &self.inner.config.interval)
            .field("subscribers", &self.inner.broker.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{callback, Delivery, SequenceGenerator};
    use cascade_core::Notification;

    fn recorder(source: &Source) -> (Subscription, Arc<Mutex<Vec<Notification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = source.subscribe(move |n: &Notification| {
            sink.lock().push(n.clone());
            Ok(Delivery::Done)
        });
        (sub, seen)
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Source::new("G0", SourceConfig::with_interval(Duration::ZERO), |_: Duration| 1.0);
        assert!(matches!(result, Err(CascadeError::InvalidInterval)));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let source = Source::new("G0", SourceConfig::fast(), |_: Duration| 1.0).unwrap();
        assert!(matches!(source.start(), Err(CascadeError::RuntimeUnavailable)));
        assert!(!source.is_running());
    }

    #[test]
    fn test_tick_notifies_with_own_id() {
        let source = Source::new("G1", SourceConfig::fast(), |_: Duration| 0.5).unwrap();
        let (_sub, seen) = recorder(&source);

        source.tick();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source, "G1");
        assert_eq!(seen[0].value, 0.5);
        assert_eq!(source.last_value(), Some(0.5));
    }

    #[test]
    fn test_failing_subscriber_does_not_stop_tick() {
        let source = Source::new("G1", SourceConfig::fast(), |_: Duration| 1.0).unwrap();
        source.subscribe_callback(callback(|_| Err(CascadeError::subscriber("nope"))));
        let (_sub, seen) = recorder(&source);

        source.tick();
        assert_eq!(seen.lock().len(), 1);
        let stats = source.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.notifications, 1);
        assert_eq!(stats.callback_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_emission_and_stop() {
        let interval = Duration::from_millis(100);
        let gen = SequenceGenerator::new(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let source = Source::new("G1", SourceConfig::with_interval(interval), gen).unwrap();
        let (_sub, seen) = recorder(&source);

        source.start().unwrap();
        assert!(source.is_running());
        tokio::time::sleep(interval / 2).await;
        assert_eq!(seen.lock().len(), 1);

        tokio::time::sleep(interval).await;
        assert_eq!(seen.lock().len(), 2);

        source.stop().await;
        assert!(!source.is_running());
        let after_stop = seen.lock().len();

        tokio::time::sleep(interval * 5).await;
        assert_eq!(seen.lock().len(), after_stop);
        let values: Vec<f64> = seen.lock().iter().map(|n| n.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let interval = Duration::from_millis(100);
        let source = Source::new("G1", SourceConfig::with_interval(interval), |_: Duration| 1.0).unwrap();
        let (_sub, seen) = recorder(&source);

        source.start().unwrap();
        source.start().unwrap();
        tokio::time::sleep(interval / 2).await;

        // A second task would have doubled the first emission
        assert_eq!(seen.lock().len(), 1);
        source.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let interval = Duration::from_millis(100);
        let source = Source::new("G1", SourceConfig::with_interval(interval), |_: Duration| 1.0).unwrap();
        let (_sub, seen) = recorder(&source);

        source.start().unwrap();
        tokio::time::sleep(interval / 2).await;
        source.stop().await;
        source.stop().await;

        source.start().unwrap();
        tokio::time::sleep(interval / 2).await;
        source.stop().await;
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_racing_stop_leaves_one_task() {
        let interval = Duration::from_millis(100);
        let source = Source::new("G1", SourceConfig::with_interval(interval), |_: Duration| 1.0).unwrap();
        let other = source.clone();
        let (_sub, seen) = recorder(&source);

        source.start().unwrap();
        tokio::time::sleep(interval / 2).await;

        // stop must still return even though a new task starts meanwhile
        let raced = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(source.stop(), async { other.start() })
        })
        .await;
        let ((), restarted) = raced.expect("stop hung behind the restarted task");
        restarted.unwrap();
        assert!(source.is_running());

        let before = seen.lock().len();
        tokio::time::sleep(interval * 10).await;
        let emitted = seen.lock().len() - before;
        assert!((9..=11).contains(&emitted), "emitted {emitted} ticks");

        source.stop().await;
        assert!(!source.is_running());
    }
}
