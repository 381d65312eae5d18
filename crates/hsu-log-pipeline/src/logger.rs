//! Producer API.
//!
//! A [`Logger`] is a named, cheaply clonable handle. `emit` checks the level
//! threshold, consults the shared rate limiter when a key is given, and
//! enqueues the event. Callers on any thread may emit concurrently.

use crate::channel::RecordSender;
use crate::rate_limit::{suppression_summary, Admission, RateLimiter};
use crate::types::{EmitOutcome, LogEvent, Severity};
use hsu_common::Result;
use std::sync::Arc;
use std::time::Instant;

/// Named producer handle bound to one logging context.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    min_level: Severity,
    sender: RecordSender,
    limiter: Arc<RateLimiter>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl Logger {
    pub fn new(
        name: impl Into<String>,
        min_level: Severity,
        sender: RecordSender,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            min_level,
            sender,
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_level(&self) -> Severity {
        self.min_level
    }

    /// Same logger with a different threshold.
    pub fn with_min_level(mut self, min_level: Severity) -> Self {
        self.min_level = min_level;
        self
    }

    /// Derive `name.suffix`, sharing channel, limiter and threshold.
    pub fn child(&self, suffix: &str) -> Logger {
        Logger {
            name: Arc::from(format!("{}.{}", self.name, suffix)),
            min_level: self.min_level,
            sender: self.sender.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }

    /// Emit one event.
    ///
    /// With a `rate_limit_key`, at most one event per key is queued per rate
    /// limit period; the first event queued after a suppression carries the
    /// number of dropped events as a message suffix.
    ///
    /// # Errors
    /// - `Error::ChannelClosed` if the logging context has been shut down
    pub fn emit(
        &self,
        severity: Severity,
        message: impl Into<String>,
        rate_limit_key: Option<&str>,
    ) -> Result<EmitOutcome> {
        self.emit_as(&self.name, severity, message.into(), rate_limit_key)
    }

    /// Emit under another logger name, sharing this logger's threshold,
    /// channel and limiter.
    pub(crate) fn emit_as(
        &self,
        name: &str,
        severity: Severity,
        mut message: String,
        rate_limit_key: Option<&str>,
    ) -> Result<EmitOutcome> {
        if severity < self.min_level {
            return Ok(EmitOutcome::BelowLevel);
        }

        if let Some(key) = rate_limit_key {
            match self.limiter.admit(key, Instant::now()) {
                Admission::Suppress => return Ok(EmitOutcome::Suppressed),
                Admission::Emit { suppressed } if suppressed > 0 => {
                    message.push_str(&suppression_summary(suppressed));
                }
                Admission::Emit { .. } => {}
            }
        }

        let event = LogEvent::new(name, severity, message)
            .with_rate_limit_key(rate_limit_key.map(str::to_owned));
        self.sender.send(event)?;
        Ok(EmitOutcome::Queued)
    }

    /// Emit under a rate-limit key.
    pub fn emit_limited(
        &self,
        severity: Severity,
        key: &str,
        message: impl Into<String>,
    ) -> Result<EmitOutcome> {
        self.emit(severity, message, Some(key))
    }

    pub fn debug(&self, message: impl Into<String>) -> Result<EmitOutcome> {
        self.emit(Severity::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> Result<EmitOutcome> {
        self.emit(Severity::Info, message, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> Result<EmitOutcome> {
        self.emit(Severity::Warning, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> Result<EmitOutcome> {
        self.emit(Severity::Error, message, None)
    }

    pub fn critical(&self, message: impl Into<String>) -> Result<EmitOutcome> {
        self.emit(Severity::Critical, message, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::record_channel;
    use std::time::Duration;

    fn logger(period: Duration) -> (Logger, crate::channel::RecordReceiver) {
        let (tx, rx) = record_channel(None);
        let limiter = Arc::new(RateLimiter::new(period));
        (Logger::new("app", Severity::Info, tx, limiter), rx)
    }

    #[test]
    fn test_below_level_is_not_queued() {
        let (log, mut rx) = logger(Duration::from_secs(30));
        assert_eq!(log.debug("quiet").unwrap(), EmitOutcome::BelowLevel);
        assert_eq!(log.info("loud").unwrap(), EmitOutcome::Queued);

        assert_eq!(rx.recv().unwrap().message(), "loud");
    }

    #[test]
    fn test_unkeyed_events_are_never_limited() {
        let (log, _rx) = logger(Duration::from_secs(30));
        for _ in 0..5 {
            assert!(log.warning("same text").unwrap().is_queued());
        }
    }

    #[test]
    fn test_keyed_events_are_limited_per_key() {
        let (log, mut rx) = logger(Duration::from_secs(30));

        for _ in 0..3 {
            log.emit(Severity::Info, "Informational message (info)", Some("info"))
                .unwrap();
            log.emit(Severity::Warning, "Warning message (warning)", Some("warning"))
                .unwrap();
        }

        let first = rx.recv().unwrap();
        let second = rx.recv().unwrap();
        assert_eq!(first.rate_limit_key(), Some("info"));
        assert_eq!(second.rate_limit_key(), Some("warning"));
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_summary_is_appended_after_window() {
        let (log, mut rx) = logger(Duration::from_millis(20));

        log.emit_limited(Severity::Error, "disk", "disk full").unwrap();
        assert_eq!(
            log.emit_limited(Severity::Error, "disk", "disk full").unwrap(),
            EmitOutcome::Suppressed
        );
        std::thread::sleep(Duration::from_millis(30));
        log.emit_limited(Severity::Error, "disk", "disk full").unwrap();

        assert_eq!(rx.recv().unwrap().message(), "disk full");
        assert_eq!(
            rx.recv().unwrap().message(),
            "disk full (+ skipped 1 logs due to rate-limiting)"
        );
    }

    #[test]
    fn test_child_logger_name() {
        let (log, mut rx) = logger(Duration::from_secs(30));
        let child = log.child("ffmpeg");
        assert_eq!(child.name(), "app.ffmpeg");

        child.error("boom").unwrap();
        assert_eq!(rx.recv().unwrap().logger(), "app.ffmpeg");
    }

    #[test]
    fn test_emit_after_close_fails() {
        let (tx, _rx) = record_channel(None);
        let log = Logger::new("app", Severity::Info, tx.clone(), Arc::default());
        tx.close();

        assert!(log.info("late").unwrap_err().is_channel_closed());
        assert_eq!(log.debug("late").unwrap(), EmitOutcome::BelowLevel);
    }
}
