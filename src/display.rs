//! Output Formatting and Display
//!
//! This module renders engine reports for people and for programs. Every renderer is a
//! [`ReportSink`], so output is produced while the scan is still running, in close
//! order.
//!
//! ## Renderers
//!
//! - [`ConsoleReporter`] - one aligned, optionally colored line per report
//! - [`JsonLinesReporter`] - one JSON object per report and line
//! - [`JsonArrayReporter`] - a single JSON array, closed on [`ReportSink::finish`]
//!
//! ## Console Format
//!
//! ```text
//! b:             2048 N:             3                                 photos/2024/   O: 2024-01-02 N: 2024-06-30  STANDARD
//! ```
//!
//! With `human` enabled, sizes use base-2 units (`2.0 Ki`) and counts use base-10
//! suffixes (`3.1 M`). Dates are shown in the configured fixed offset.
//!
//! Renderers never fail a scan. The first write error is kept and returned from
//! `finish`; later reports are dropped.

use crate::models::Accumulator;
use crate::sink::{ReportSink, UsageReport};
use chrono::{FixedOffset, Offset, Utc};
use colored::Colorize;
use std::io::{self, Write};

const BYTE_UNITS: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const COUNT_UNITS: [&str; 5] = ["", "K", "M", "G", "T"];

/// Base-2 humanized byte count, e.g. `1.5 Mi`.
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes, 1024.0, &BYTE_UNITS)
}

/// Base-10 humanized object count, e.g. `12.0  K`.
pub fn format_count(count: u64) -> String {
    scaled(count, 1000.0, &COUNT_UNITS)
}

fn scaled(value: u64, step: f64, units: &[&str]) -> String {
    let mut amount = value as f64;
    let mut unit = 0;
    while amount >= step && unit + 1 < units.len() {
        amount /= step;
        unit += 1;
    }
    format!("{:.1} {:>2}", amount, units[unit])
}

/// How reports are rendered for a terminal.
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    pub human: bool,
    pub color: bool,
    pub offset: FixedOffset,
    pub date_format: String,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            human: false,
            color: false,
            offset: Utc.fix(),
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

/// Line-per-report console renderer.
pub struct ConsoleReporter<W: Write> {
    out: W,
    options: DisplayOptions,
    error: Option<io::Error>,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, options: DisplayOptions) -> Self {
        Self {
            out,
            options,
            error: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render one report without writing it.
    pub fn render(&self, report: &UsageReport) -> String {
        match report {
            UsageReport::Leaf { stats, .. } => {
                let line = self.stats_line(stats);
                if self.options.color {
                    line.white().to_string()
                } else {
                    line
                }
            }
            UsageReport::Truncated { parent, limit, .. } => {
                let line = format!(
                    "   ... more than {limit} entries in {}, not listing the rest",
                    display_path(parent)
                );
                if self.options.color {
                    line.bright_yellow().to_string()
                } else {
                    line
                }
            }
            UsageReport::Prefix {
                depth,
                stats,
                omitted,
            } => {
                let mut line = self.stats_line(stats);
                if *omitted > 0 {
                    line.push_str(&format!("  (+{omitted} not listed)"));
                }
                match (self.options.color, *depth) {
                    (false, _) => line,
                    (true, 0) => line.bright_white().bold().to_string(),
                    (true, _) => line.bright_cyan().to_string(),
                }
            }
        }
    }

    fn stats_line(&self, stats: &Accumulator) -> String {
        let (size, count) = if self.options.human {
            (format_bytes(stats.size), format_count(stats.count))
        } else {
            (stats.size.to_string(), stats.count.to_string())
        };

        format!(
            "b: {:>16} N: {:>13} {:>60}   O: {} N: {}  {}",
            size,
            count,
            display_path(&stats.path),
            self.date(stats.oldest),
            self.date(stats.newest),
            self.tiers(stats)
        )
    }

    fn date(&self, value: Option<chrono::DateTime<Utc>>) -> String {
        match value {
            Some(ts) => ts
                .with_timezone(&self.options.offset)
                .format(&self.options.date_format)
                .to_string(),
            None => "-".to_string(),
        }
    }

    fn tiers(&self, stats: &Accumulator) -> String {
        if stats.tier_breakdown.len() == 1 {
            return stats
                .tier_breakdown
                .keys()
                .map(|tier| tier.to_string())
                .collect();
        }
        stats
            .tier_breakdown
            .iter()
            .map(|(tier, bytes)| {
                let bytes = if self.options.human {
                    format_bytes(*bytes).trim_end().to_string()
                } else {
                    bytes.to_string()
                };
                format!("{tier}={bytes}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<W: Write> ReportSink for ConsoleReporter<W> {
    fn emit(&mut self, report: UsageReport) {
        if self.error.is_some() {
            return;
        }
        let line = self.render(&report);
        if let Err(e) = writeln!(self.out, "{line}") {
            self.error = Some(e);
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()
    }
}

/// One JSON object per line.
pub struct JsonLinesReporter<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ReportSink for JsonLinesReporter<W> {
    fn emit(&mut self, report: UsageReport) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.out, &report)
            .map_err(io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(e) = result {
            self.error = Some(e);
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()
    }
}

/// All reports as one JSON array, for writing to a file.
pub struct JsonArrayReporter<W: Write> {
    out: W,
    pretty: bool,
    written: usize,
    error: Option<io::Error>,
}

impl<W: Write> JsonArrayReporter<W> {
    pub fn new(out: W, pretty: bool) -> Self {
        Self {
            out,
            pretty,
            written: 0,
            error: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_entry(&mut self, report: &UsageReport) -> io::Result<()> {
        let opening: &[u8] = match (self.written, self.pretty) {
            (0, true) => b"[\n  ",
            (0, false) => b"[",
            (_, true) => b",\n  ",
            (_, false) => b",",
        };
        self.out.write_all(opening)?;

        let body = if self.pretty {
            serde_json::to_string_pretty(report)?.replace('\n', "\n  ")
        } else {
            serde_json::to_string(report)?
        };
        self.out.write_all(body.as_bytes())?;
        self.written += 1;
        Ok(())
    }
}

impl<W: Write> ReportSink for JsonArrayReporter<W> {
    fn emit(&mut self, report: UsageReport) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write_entry(&report) {
            self.error = Some(e);
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let closing: &[u8] = match (self.written, self.pretty) {
            (0, _) => b"[]\n",
            (_, true) => b"\n]\n",
            (_, false) => b"]\n",
        };
        self.out.write_all(closing)?;
        self.out.flush()
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}
