use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::output::{ContentFilter, LineFormat, DEFAULT_SUPPRESSED_PREFIXES};
use crate::rate_limit::DEFAULT_RATE_LIMIT_PERIOD;
use crate::types::Severity;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of captured lines kept per pipe.
pub const DEFAULT_CAPTURE_CAPACITY: usize = 100;

/// Default cap on the bytes kept from a single captured line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024;

/// Default wait for a pipe reader thread at teardown.
pub const DEFAULT_READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Logging pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Suppression window for rate-limited keys
    #[serde(with = "duration_serde")]
    pub rate_limit_period: Duration,

    /// Lines kept by each pipe capture
    pub capture_capacity: usize,

    /// Severity captured lines are logged at
    pub capture_level: Severity,

    /// Longer captured lines are cut to this many bytes
    pub max_line_bytes: usize,

    /// Threshold applied by loggers handed out by the context
    pub min_level: Severity,

    /// Bound on queued events; 0 means unbounded
    pub channel_capacity: usize,

    /// Write to stderr
    pub console: bool,

    /// Optional log file (appended)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,

    /// Messages starting with any of these are dropped by the sinks
    pub suppressed_prefixes: Vec<String>,

    /// Cut logger names to the column width instead of letting them overflow
    pub truncate_names: bool,

    /// How long teardown waits for a pipe reader thread
    #[serde(with = "duration_serde")]
    pub reader_join_timeout: Duration,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rate_limit_period: DEFAULT_RATE_LIMIT_PERIOD,
            capture_capacity: DEFAULT_CAPTURE_CAPACITY,
            capture_level: Severity::Error,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            min_level: Severity::Info,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            console: true,
            output_file: None,
            suppressed_prefixes: DEFAULT_SUPPRESSED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            truncate_names: false,
            reader_join_timeout: DEFAULT_READER_JOIN_TIMEOUT,
        }
    }
}

impl LoggingConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: LoggingConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_period.is_zero() {
            return Err(anyhow!("Rate limit period must be greater than 0"));
        }

        if self.capture_capacity == 0 {
            return Err(anyhow!("Capture capacity must be at least 1 line"));
        }

        if self.max_line_bytes == 0 {
            return Err(anyhow!("Max line bytes must be at least 1"));
        }

        if self.reader_join_timeout.is_zero() {
            return Err(anyhow!("Reader join timeout must be greater than 0"));
        }

        if self.suppressed_prefixes.iter().any(|p| p.is_empty()) {
            return Err(anyhow!(
                "Suppressed prefixes must not be empty (an empty prefix drops every message)"
            ));
        }

        Ok(())
    }

    /// Channel bound, `None` when unbounded.
    pub fn channel_bound(&self) -> Option<usize> {
        (self.channel_capacity > 0).then_some(self.channel_capacity)
    }

    /// Sink format derived from this configuration.
    pub fn line_format(&self) -> LineFormat {
        LineFormat {
            min_level: self.min_level,
            filter: ContentFilter::new(self.suppressed_prefixes.iter().cloned()),
            truncate_names: self.truncate_names,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if let Some(num_str) = s.strip_suffix("ms") {
            let millis: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num_str) = s.strip_suffix('s') {
            let secs: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num_str) = s.strip_suffix('m') {
            let mins: u64 = num_str.trim().parse().map_err(|_| format!("Invalid duration: {}", s))?;
            let secs = mins
                .checked_mul(60)
                .ok_or_else(|| format!("Invalid duration: {} (too large)", s))?;
            Ok(Duration::from_secs(secs))
        } else {
            // Bare numbers are seconds
            let secs: u64 = s.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.rate_limit_period, Duration::from_secs(30));
        assert_eq!(config.capture_capacity, 100);
        assert_eq!(config.capture_level, Severity::Error);
        assert_eq!(config.channel_bound(), Some(10_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let config = LoggingConfig::load_from_string(
            r#"
rate_limit_period: 10s
capture_capacity: 50
capture_level: warn
channel_capacity: 0
output_file: /var/log/app.log
"#,
        )
        .unwrap();

        assert_eq!(config.rate_limit_period, Duration::from_secs(10));
        assert_eq!(config.capture_capacity, 50);
        assert_eq!(config.capture_level, Severity::Warning);
        assert_eq!(config.channel_bound(), None);
        assert_eq!(config.output_file, Some(PathBuf::from("/var/log/app.log")));
        assert!(config.console);
        assert_eq!(config.reader_join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_period() {
        let err = LoggingConfig::load_from_string("rate_limit_period: 0s").unwrap_err();
        assert!(err.to_string().contains("Rate limit period"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(LoggingConfig::load_from_string("capture_capacity: 0").is_err());
    }

    #[test]
    fn test_rejects_empty_prefix() {
        assert!(LoggingConfig::load_from_string("suppressed_prefixes: ['']").is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = LoggingConfig::load_from_file("/nonexistent/logging.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_upper_case_levels() {
        let config = LoggingConfig::load_from_string(
            r#"
capture_level: ERROR
min_level: Debug
"#,
        )
        .unwrap();
        assert_eq!(config.capture_level, Severity::Error);
        assert_eq!(config.min_level, Severity::Debug);
    }

    #[test]
    fn test_overflowing_minutes_are_rejected() {
        let err = LoggingConfig::load_from_string("rate_limit_period: 307445734561825861m").unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid duration"));
        assert!(duration_serde::parse_duration("307445734561825861m").is_err());
    }

    #[test]
    fn test_max_line_bytes() {
        assert_eq!(LoggingConfig::default().max_line_bytes, 8192);
        let config = LoggingConfig::load_from_string("max_line_bytes: 512").unwrap();
        assert_eq!(config.max_line_bytes, 512);
        assert!(LoggingConfig::load_from_string("max_line_bytes: 0").is_err());
    }

    #[test]
    fn test_duration_parsing() {
        use duration_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_round_trip_keeps_durations() {
        let mut config = LoggingConfig::default();
        config.reader_join_timeout = Duration::from_millis(1500);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back = LoggingConfig::load_from_string(&yaml).unwrap();
        assert_eq!(back.reader_join_timeout, Duration::from_millis(1500));
        assert_eq!(back.rate_limit_period, Duration::from_secs(30));
    }
}
