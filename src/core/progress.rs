//! Per-target progress reporting.
//!
//! Each replication owns exactly one [`ProgressSink`]. Sinks are never shared
//! between targets; the only shared piece is the indicatif `MultiProgress`
//! that lays the bars out on the terminal.

use std::io::IsTerminal;
use std::time::Duration;

use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::logging::LogThrottle;

const BAR_TEMPLATE: &str =
    "{prefix:.green} {pos:>7}/{len:7} [{bar:40.cyan/blue}] {percent:>3}% {elapsed_precise}";

/// How often the text sink may emit a progress line.
const LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Receives progress signals for one destination target.
pub trait ProgressSink: Send {
    fn advance(&mut self, n: u64);
    fn finish(&mut self);
}

/// Items processed so far against the precomputed total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub processed: u64,
    pub total: u64,
}

impl ProgressState {
    pub fn new(total: u64) -> Self {
        Self {
            processed: 0,
            total,
        }
    }

    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = (self.processed as f64 / self.total as f64) * 100.0;
        pct.min(100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Bars on an interactive terminal, log lines otherwise
    #[default]
    Auto,
    Bar,
    Log,
    None,
}

impl ProgressMode {
    fn resolve(self) -> Self {
        match self {
            Self::Auto if std::io::stderr().is_terminal() => Self::Bar,
            Self::Auto => Self::Log,
            other => other,
        }
    }
}

/// Hands out one sink per destination target.
#[derive(Clone)]
pub struct ProgressFactory {
    mode: ProgressMode,
    multi: MultiProgress,
}

impl ProgressFactory {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode: mode.resolve(),
            multi: MultiProgress::new(),
        }
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    /// The bar set log output must suspend, when bars are in use.
    pub fn bars(&self) -> Option<MultiProgress> {
        (self.mode == ProgressMode::Bar).then(|| self.multi.clone())
    }

    pub fn sink(&self, label: String, total: u64) -> Box<dyn ProgressSink> {
        match self.mode {
            ProgressMode::Bar => Box::new(BarSink::new(&self.multi, label, total)),
            ProgressMode::Log => Box::new(LogSink::new(label, total)),
            ProgressMode::None | ProgressMode::Auto => Box::new(NullSink),
        }
    }
}

/// Terminal progress bar.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(multi: &MultiProgress, label: String, total: u64) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(style);
        bar.set_prefix(label);

        Self { bar }
    }
}

impl ProgressSink for BarSink {
    fn advance(&mut self, n: u64) {
        self.bar.inc(n);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

/// Throttled progress lines for non-interactive output.
pub struct LogSink {
    label: String,
    state: ProgressState,
    throttle: LogThrottle,
}

impl LogSink {
    pub fn new(label: String, total: u64) -> Self {
        Self {
            label,
            state: ProgressState::new(total),
            throttle: LogThrottle::new(LOG_INTERVAL),
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }
}

impl ProgressSink for LogSink {
    fn advance(&mut self, n: u64) {
        self.state.processed += n;

        if self.throttle.should_log() {
            info!(
                label = %self.label,
                processed = self.state.processed,
                total = self.state.total,
                percentage = self.state.percentage(),
                "Replication progress"
            );
        }
    }

    fn finish(&mut self) {
        info!(
            label = %self.label,
            processed = self.state.processed,
            total = self.state.total,
            "Replication finished"
        );
    }
}

/// Discards all progress signals.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn advance(&mut self, _n: u64) {}

    fn finish(&mut self) {}
}
