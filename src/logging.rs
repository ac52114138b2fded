//! Logging and tracing initialization.
//!
//! Structured logging through the `tracing` ecosystem, either as compact
//! human-readable lines or as JSON. Logs go to stderr so they share the
//! terminal with the progress bars; while bars are drawn each line is
//! printed with the bars suspended so neither tears the other.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::MultiProgress;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
    /// Bars currently drawn on stderr, if any
    pub progress: Option<MultiProgress>,
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "fatmirror={}",
            default_level.as_str().to_lowercase()
        ))
    });

    let writer = StderrWriter::new(config.progress);

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// Hands each log event a buffer that is written to stderr in one piece.
#[derive(Clone, Default)]
pub struct StderrWriter {
    multi: Option<MultiProgress>,
}

impl StderrWriter {
    pub fn new(multi: Option<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for StderrWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            buf: Vec::new(),
            multi: self.multi.clone(),
        }
    }
}

/// One formatted event. Emitted on drop.
pub struct EventWriter {
    buf: Vec<u8>,
    multi: Option<MultiProgress>,
}

impl EventWriter {
    fn emit<W: Write>(&mut self, out: &mut W) {
        if self.buf.is_empty() {
            return;
        }
        let buf = std::mem::take(&mut self.buf);
        let mut write = || {
            let _ = out.write_all(&buf);
            let _ = out.flush();
        };
        match &self.multi {
            Some(multi) => multi.suspend(write),
            None => write(),
        }
    }
}

impl Write for EventWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        self.emit(&mut io::stderr().lock());
    }
}

/// Sentinel value indicating the throttle has never logged
const NEVER_LOGGED: u64 = u64::MAX;

/// Lets at most one log line through per interval. Used to keep text
/// progress updates from flooding the output.
pub struct LogThrottle {
    interval_ms: u64,
    last_log_ms: AtomicU64,
    start: Instant,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_log_ms: AtomicU64::new(NEVER_LOGGED),
            start: Instant::now(),
        }
    }

    /// True on the first call and whenever the interval has elapsed since
    /// the last `true`.
    pub fn should_log(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        if last != NEVER_LOGGED && now_ms.saturating_sub(last) < self.interval_ms {
            return false;
        }

        // Losing the race means another thread just logged.
        self.last_log_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}
