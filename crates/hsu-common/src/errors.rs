//! Error types for the HSU logging pipeline.
//!
//! # Rust Learning Note
//!
//! Most conditions in a logging pipeline are *not* errors: a rate-limited
//! message, a subprocess that closed its pipe early, or a reader thread that
//! refuses to join at teardown are all handled where they happen. Only misuse
//! of shutdown-sensitive resources reaches the caller as an `Err`.
//!
//! ```rust
//! use hsu_common::{Error, Result};
//!
//! fn enqueue(closed: bool) -> Result<()> {
//!     if closed {
//!         return Err(Error::channel_closed("log-records"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(enqueue(true).is_err());
//! ```

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the logging pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An event was sent after the channel was closed.
    #[error("Channel closed: {channel} no longer accepts records")]
    ChannelClosed { channel: String },

    /// A pipe capture was closed twice, or used after close.
    #[error("Capture closed: {name} - {operation}")]
    CaptureClosed { name: String, operation: String },

    /// Allocating or duplicating an OS pipe failed.
    #[error("Pipe error: {name} - {reason}")]
    Pipe { name: String, reason: String },

    /// A background thread could not be spawned.
    #[error("Thread spawn failed: {name} - {reason}")]
    Thread { name: String, reason: String },

    /// A sink failed to write, flush or close.
    #[error("Sink error: {sink} - {reason}")]
    Sink { sink: String, reason: String },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    pub fn capture_closed(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::CaptureClosed {
            name: name.into(),
            operation: operation.into(),
        }
    }

    pub fn pipe(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pipe {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn thread(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Thread {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn sink(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Adds context to an error.
    ///
    /// # Example
    /// ```
    /// use hsu_common::{Error, Result};
    ///
    /// fn inner() -> Result<()> {
    ///     Err(Error::channel_closed("log-records"))
    /// }
    ///
    /// fn outer() -> Result<()> {
    ///     inner().map_err(|e| e.context("Failed to emit startup banner"))
    /// }
    ///
    /// assert!(outer().unwrap_err().to_string().contains("startup banner"));
    /// ```
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a closed-channel error.
    pub fn is_channel_closed(&self) -> bool {
        match self {
            Self::ChannelClosed { .. } => true,
            Self::WithContext { source, .. } => source.is_channel_closed(),
            _ => false,
        }
    }
}

// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::channel_closed("records");
        assert!(matches!(err, Error::ChannelClosed { .. }));
        assert_eq!(
            err.to_string(),
            "Channel closed: records no longer accepts records"
        );
    }

    #[test]
    fn test_error_context() {
        let err = Error::sink("console", "broken pipe").context("Dispatch failed");

        let error_message = err.to_string();
        assert!(error_message.contains("Dispatch failed"));
        assert!(error_message.contains("broken pipe"));
    }

    #[test]
    fn test_channel_closed_seen_through_context() {
        let err: Result<()> = Err(Error::channel_closed("records"));
        let err = err.context("emit").unwrap_err();
        assert!(err.is_channel_closed());
        assert!(!Error::configuration("bad").is_channel_closed());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
