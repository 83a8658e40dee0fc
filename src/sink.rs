//! Report sinks.
//!
//! The rollup engine never renders anything itself. Every closed accumulator, every
//! individually displayed leaf and every "further entries omitted" marker is handed to
//! a [`ReportSink`] synchronously, in close order: a prefix is only reported after all
//! of its descendants have been.

use crate::models::Accumulator;
use serde::Serialize;
use std::io;

/// One event produced by the rollup engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageReport {
    /// A single key shown on its own. `depth` is one below its enclosing prefix.
    Leaf { depth: usize, stats: Accumulator },

    /// The enclosing prefix has more leaves than the display limit; emitted once.
    Truncated {
        depth: usize,
        parent: String,
        limit: usize,
    },

    /// A prefix whose key range has been fully consumed. Depth 0 is the scan root.
    Prefix {
        depth: usize,
        stats: Accumulator,
        /// Leaves that were folded but not shown because of the display limit.
        omitted: u64,
    },
}

impl UsageReport {
    pub fn depth(&self) -> usize {
        match self {
            Self::Leaf { depth, .. } | Self::Truncated { depth, .. } | Self::Prefix { depth, .. } => {
                *depth
            }
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Prefix { depth: 0, .. })
    }
}

/// Receiver of engine reports.
///
/// `emit` has no return value and must not block for long; the engine applies no
/// backpressure beyond the call itself. Sinks that write somewhere fallible keep the
/// first error and hand it back from [`ReportSink::finish`].
pub trait ReportSink {
    fn emit(&mut self, report: UsageReport);

    /// Flush buffered output once the scan is over.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ReportSink + ?Sized> ReportSink for &mut T {
    fn emit(&mut self, report: UsageReport) {
        (**self).emit(report)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

impl<T: ReportSink + ?Sized> ReportSink for Box<T> {
    fn emit(&mut self, report: UsageReport) {
        self.as_mut().emit(report)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.as_mut().finish()
    }
}

/// Sends every report to both sinks, left first.
impl<A: ReportSink, B: ReportSink> ReportSink for (A, B) {
    fn emit(&mut self, report: UsageReport) {
        self.0.emit(report.clone());
        self.1.emit(report);
    }

    fn finish(&mut self) -> io::Result<()> {
        let left = self.0.finish();
        let right = self.1.finish();
        left.and(right)
    }
}

/// Optional sink; `None` drops every report.
impl<T: ReportSink> ReportSink for Option<T> {
    fn emit(&mut self, report: UsageReport) {
        if let Some(sink) = self {
            sink.emit(report);
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

/// Keeps every report in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub reports: Vec<UsageReport>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed prefixes, in close order.
    pub fn prefixes(&self) -> impl Iterator<Item = &Accumulator> {
        self.reports.iter().filter_map(|r| match r {
            UsageReport::Prefix { stats, .. } => Some(stats),
            _ => None,
        })
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Accumulator> {
        self.reports.iter().filter_map(|r| match r {
            UsageReport::Leaf { stats, .. } => Some(stats),
            _ => None,
        })
    }

    /// Parents of every omission marker.
    pub fn truncated(&self) -> impl Iterator<Item = &str> {
        self.reports.iter().filter_map(|r| match r {
            UsageReport::Truncated { parent, .. } => Some(parent.as_str()),
            _ => None,
        })
    }

    pub fn prefix(&self, path: &str) -> Option<&Accumulator> {
        self.prefixes().find(|acc| acc.path == path)
    }
}

impl ReportSink for CollectingSink {
    fn emit(&mut self, report: UsageReport) {
        self.reports.push(report);
    }
}
