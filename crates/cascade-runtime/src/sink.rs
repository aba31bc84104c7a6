//! Report sinks for consumers

use std::fmt;
use std::io::{self, Write};

use cascade_core::{CascadeError, CascadeResult, NodeId, Timestamp};

/// One consumer recomputation, ready to be rendered
#[derive(Clone, Debug, PartialEq)]
pub struct MedianReport {
    /// Reporting consumer
    pub consumer: NodeId,
    /// Timestamp of the triggering event
    pub timestamp: Timestamp,
    pub label: String,
    pub entity_noun: String,
    /// Number of contributing aggregators
    pub count: usize,
    pub median: f64,
    /// Decimal places used when rendering `median`
    pub precision: usize,
}

impl fmt::Display for MedianReport {
    /// `[HH:MM:SS] <label> median across <N> <entities>: <median>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} median across {} {}: {:.*}",
            self.timestamp.local_clock(),
            self.label,
            self.count,
            self.entity_noun,
            self.precision,
            self.median
        )
    }
}

/// Destination for consumer reports
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &MedianReport) -> CascadeResult<()>;
}

impl<F> ReportSink for F
where
    F: Fn(&MedianReport) -> CascadeResult<()> + Send + Sync,
{
    fn report(&self, report: &MedianReport) -> CascadeResult<()> {
        self(report)
    }
}

/// Writes one line per report to stdout
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn report(&self, report: &MedianReport) -> CascadeResult<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{report}").map_err(|e| CascadeError::Sink(e.to_string()))
    }
}

/// Emits each report as an `info` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, report: &MedianReport) -> CascadeResult<()> {
        tracing::info!(
            consumer = %report.consumer,
            count = report.count,
            median = report.median,
            "{report}"
        );
        Ok(())
    }
}
