//! Process-wide logging context.
//!
//! A [`LoggingContext`] owns the record channel, the shared rate limiter and
//! the listener thread. Everything that logs gets its handle from here:
//! [`Logger`]s, pipe captures and the `tracing` layer. Dropping the context
//! (or calling [`LoggingContext::shutdown`]) stops the listener after every
//! event accepted so far has been written.

use crate::bridge::ChannelLayer;
use crate::channel::{record_channel, RecordSender};
use crate::config::LoggingConfig;
use crate::listener::AggregatorListener;
use crate::logger::Logger;
use crate::output::{ConsoleSink, FileSink, Sink};
use crate::rate_limit::RateLimiter;
use hsu_common::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::debug;

#[cfg(unix)]
use crate::capture::{CaptureOptions, PipeCapture};

/// Backing logger of the `tracing` layer; forwarded events are named after their target.
const TRACING_LOGGER: &str = "tracing";

pub struct LoggingContext {
    config: LoggingConfig,
    sender: RecordSender,
    limiter: Arc<RateLimiter>,
    listener: AggregatorListener,
}

impl std::fmt::Debug for LoggingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingContext")
            .field("listener", &self.listener)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl LoggingContext {
    /// Build the sinks named by `config` and start the listener.
    pub fn init(config: LoggingConfig) -> Result<Self> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

        if config.console {
            sinks.push(Box::new(ConsoleSink::new(config.line_format())));
        }

        if let Some(path) = &config.output_file {
            let sink = FileSink::new(path, config.line_format())
                .context(format!("Failed to open log file {}", path.display()))?;
            sinks.push(Box::new(sink));
        }

        Self::with_sinks(config, sinks)
    }

    /// Start the listener with caller-provided sinks.
    pub fn with_sinks(config: LoggingConfig, sinks: Vec<Box<dyn Sink>>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::configuration(format!("{:#}", e)))?;

        let (sender, receiver) = record_channel(config.channel_bound());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_period));
        let listener = AggregatorListener::start(sender.clone(), receiver, sinks)?;

        debug!(
            period_secs = config.rate_limit_period.as_secs(),
            channel_capacity = config.channel_capacity,
            "Logging context initialized"
        );

        Ok(Self {
            config,
            sender,
            limiter,
            listener,
        })
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    /// Logger named `name` at the configured threshold.
    pub fn logger(&self, name: impl Into<String>) -> Logger {
        Logger::new(
            name,
            self.config.min_level,
            self.sender.clone(),
            Arc::clone(&self.limiter),
        )
    }

    /// Start a pipe capture whose drained lines are logged as `name`.
    #[cfg(unix)]
    pub fn capture(&self, name: impl Into<String>) -> Result<PipeCapture> {
        self.capture_with(name, CaptureOptions::from_config(&self.config))
    }

    /// Start a pipe capture with explicit options.
    #[cfg(unix)]
    pub fn capture_with(
        &self,
        name: impl Into<String>,
        options: CaptureOptions,
    ) -> Result<PipeCapture> {
        PipeCapture::start(self.logger(name), options)
    }

    /// A `tracing_subscriber` layer feeding this context.
    pub fn tracing_layer(&self) -> ChannelLayer {
        ChannelLayer::new(self.logger(TRACING_LOGGER))
    }

    /// The limiter shared by every logger of this context.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Events written to the sinks so far.
    pub fn dispatched(&self) -> u64 {
        self.listener.dispatched()
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Stop accepting events, write everything already queued and join the
    /// listener. Returns `false` if the context was already shut down.
    pub fn shutdown(&self) -> bool {
        self.listener.stop()
    }
}

impl Drop for LoggingContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
