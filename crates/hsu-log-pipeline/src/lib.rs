//! # HSU Log Pipeline
//!
//! Multi-producer, single-consumer log aggregation.
//!
//! Any number of threads emit log events through [`Logger`] handles. Events
//! travel over one channel to a single listener thread that formats them and
//! writes them to every configured [`Sink`]. On the way in, events carrying a
//! rate-limit key pass through a shared [`RateLimiter`] that lets at most one
//! event per key through each period.
//!
//! Raw output of child processes is collected by [`PipeCapture`]: a reader
//! thread keeps the most recent lines of a pipe in a bounded buffer until the
//! owner drains them into the log.
//!
//! ```no_run
//! use hsu_log_pipeline::{LoggingConfig, LoggingContext, Severity};
//!
//! # fn main() -> hsu_common::Result<()> {
//! let context = LoggingContext::init(LoggingConfig::default())?;
//! let log = context.logger("recorder");
//!
//! log.info("started")?;
//! log.emit(Severity::Error, "disk full", Some("disk-full"))?;
//!
//! context.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod context;
pub mod listener;
pub mod logger;
pub mod output;
pub mod rate_limit;
pub mod scrub;
pub mod types;

#[cfg(unix)]
pub mod capture;

pub use bridge::ChannelLayer;
pub use channel::{record_channel, RecordReceiver, RecordSender};
pub use config::LoggingConfig;
pub use context::LoggingContext;
pub use listener::AggregatorListener;
pub use logger::Logger;
pub use output::{ConsoleSink, ContentFilter, FileSink, LineFormat, MemorySink, Sink};
pub use rate_limit::{Admission, RateLimiter};
pub use scrub::{default_scrubber, no_scrub, scrub_credentials, Scrubber};
pub use types::{EmitOutcome, LogEvent, Severity};

#[cfg(unix)]
pub use capture::{CaptureOptions, CaptureState, PipeCapture};
