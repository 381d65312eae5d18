//! Core types for the log pipeline

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log event, ordered from least to most severe.
///
/// Serialized lower-case; deserialized through [`FromStr`], so any case and
/// the `warn` spelling are accepted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Upper-case label used in formatted output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so width/alignment specifiers apply to the label
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "Invalid severity: {}, must be one of: debug, info, warning, error, critical",
                other
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

/// A single log record travelling from a producer to the sinks.
///
/// Events are immutable once built; the listener consumes each one exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    timestamp: DateTime<Local>,
    logger: String,
    severity: Severity,
    message: String,
    rate_limit_key: Option<String>,
}

impl LogEvent {
    /// Create an event stamped with the current local time.
    pub fn new(logger: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::at(Local::now(), logger, severity, message)
    }

    /// Create an event with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Local>,
        logger: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            logger: logger.into(),
            severity,
            message: message.into(),
            rate_limit_key: None,
        }
    }

    /// Attach the rate-limit key the event was admitted under.
    pub fn with_rate_limit_key(mut self, key: Option<String>) -> Self {
        self.rate_limit_key = key;
        self
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn rate_limit_key(&self) -> Option<&str> {
        self.rate_limit_key.as_deref()
    }
}

/// What happened to an `emit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The event was placed on the channel.
    Queued,
    /// The rate limiter suppressed the event.
    Suppressed,
    /// The event was below the logger's minimum severity.
    BelowLevel,
}

impl EmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EmitOutcome::Queued)
    }
}
