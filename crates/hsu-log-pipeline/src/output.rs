//! Sinks: the terminal outputs of the pipeline.
//!
//! Every sink renders events through a [`LineFormat`], which applies the
//! level threshold and the noisy-prefix filter before formatting. Sinks are
//! only ever touched by the listener thread, so they carry no locks of their
//! own (the in-memory sink locks only to share its lines with readers).

use crate::types::{LogEvent, Severity};
use hsu_common::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Width the logger name is padded to.
pub const NAME_WIDTH: usize = 30;
/// Width the level label is padded to.
pub const LEVEL_WIDTH: usize = 8;
/// Timestamp layout: `YYYY-MM-DD HH:MM:SS`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Messages from upstream libraries that are dropped by default.
pub const DEFAULT_SUPPRESSED_PREFIXES: &[&str] = &["You are using a scalar distance function"];

/// Trait for writing log events to an output
pub trait Sink: Send {
    /// Short name used in diagnostics
    fn name(&self) -> &str;

    /// Write one event (may be filtered out)
    fn write(&mut self, event: &LogEvent) -> Result<()>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<()>;

    /// Close the sink
    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Drops messages that start with any of a fixed set of prefixes.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    prefixes: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// The filter used when nothing is configured.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SUPPRESSED_PREFIXES.iter().copied())
    }

    pub fn allows(&self, message: &str) -> bool {
        !self
            .prefixes
            .iter()
            .any(|prefix| message.starts_with(prefix.as_str()))
    }
}

/// Filtering and formatting shared by all sinks.
#[derive(Debug, Clone)]
pub struct LineFormat {
    pub min_level: Severity,
    pub filter: ContentFilter,
    pub truncate_names: bool,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            min_level: Severity::Debug,
            filter: ContentFilter::with_defaults(),
            truncate_names: false,
        }
    }
}

impl LineFormat {
    /// Render `event`, or `None` if it is filtered out.
    pub fn render(&self, event: &LogEvent) -> Option<String> {
        if event.severity() < self.min_level || !self.filter.allows(event.message()) {
            return None;
        }
        Some(self.format(event))
    }

    /// Format without filtering:
    /// `[YYYY-MM-DD HH:MM:SS] <name:<30> <LEVEL:<8>: <message>`
    pub fn format(&self, event: &LogEvent) -> String {
        let name: std::borrow::Cow<'_, str> = if self.truncate_names {
            event.logger().chars().take(NAME_WIDTH).collect::<String>().into()
        } else {
            event.logger().into()
        };

        format!(
            "[{}] {:<name_width$} {:<level_width$}: {}",
            event.timestamp().format(TIMESTAMP_FORMAT),
            name,
            event.severity(),
            event.message(),
            name_width = NAME_WIDTH,
            level_width = LEVEL_WIDTH,
        )
    }
}

/// Writes formatted lines to standard error.
pub struct ConsoleSink {
    format: LineFormat,
}

impl ConsoleSink {
    pub fn new(format: LineFormat) -> Self {
        Self { format }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn write(&mut self, event: &LogEvent) -> Result<()> {
        if let Some(line) = self.format.render(event) {
            let mut stderr = std::io::stderr().lock();
            writeln!(stderr, "{}", line)
                .map_err(|e| Error::sink("console", format!("Failed to write: {}", e)))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        std::io::stderr()
            .flush()
            .map_err(|e| Error::sink("console", format!("Failed to flush stderr: {}", e)))
    }
}

/// Appends formatted lines to a file.
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    format: LineFormat,
}

impl FileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn new(path: impl AsRef<Path>, format: LineFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::sink(
                    path.display().to_string(),
                    format!("Failed to create log directory: {}", e),
                )
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                Error::sink(
                    path.display().to_string(),
                    format!("Failed to open log file: {}", e),
                )
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(&mut self, event: &LogEvent) -> Result<()> {
        if let Some(line) = self.format.render(event) {
            writeln!(self.writer, "{}", line).map_err(|e| {
                Error::sink(
                    self.path.display().to_string(),
                    format!("Failed to write to log file: {}", e),
                )
            })?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| {
            Error::sink(
                self.path.display().to_string(),
                format!("Failed to flush log file: {}", e),
            )
        })
    }
}

/// Keeps the last N formatted lines in memory.
///
/// Cloning the sink shares the same lines, so a test can keep one clone and
/// hand the other to the listener.
#[derive(Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
    format: LineFormat,
}

impl MemorySink {
    pub fn new(max_lines: usize, format: LineFormat) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            max_lines,
            format,
        }
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, event: &LogEvent) -> Result<()> {
        if self.max_lines == 0 {
            return Ok(());
        }
        if let Some(line) = self.format.render(event) {
            let mut lines = self.lines.lock();
            if lines.len() == self.max_lines {
                lines.pop_front();
            }
            lines.push_back(line);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(()) // No-op for in-memory buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn fixed_event(logger: &str, severity: Severity, message: &str) -> LogEvent {
        let ts = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        LogEvent::at(ts, logger, severity, message)
    }

    #[test]
    fn test_line_format_layout() {
        let line = LineFormat::default().format(&fixed_event(
            "recorder.maintainer",
            Severity::Warning,
            "disk almost full",
        ));

        assert_eq!(
            line,
            "[2024-03-09 07:05:01] recorder.maintainer            WARNING : disk almost full"
        );
    }

    #[test]
    fn test_long_names_kept_unless_truncating() {
        let name = "a".repeat(40);
        let event = fixed_event(&name, Severity::Info, "m");

        let kept = LineFormat::default().format(&event);
        assert!(kept.contains(&name));

        let format = LineFormat {
            truncate_names: true,
            ..LineFormat::default()
        };
        let cut = format.format(&event);
        assert!(cut.contains(&format!("] {} INFO    : m", "a".repeat(30))));
    }

    #[test]
    fn test_content_filter_prefix_match() {
        let filter = ContentFilter::with_defaults();
        assert!(!filter.allows("You are using a scalar distance function, consider ..."));
        assert!(filter.allows("Note: You are using a scalar distance function"));
    }

    #[test]
    fn test_render_applies_level_and_filter() {
        let format = LineFormat {
            min_level: Severity::Info,
            ..LineFormat::default()
        };

        assert!(format
            .render(&fixed_event("a", Severity::Debug, "hidden"))
            .is_none());
        assert!(format
            .render(&fixed_event(
                "a",
                Severity::Error,
                "You are using a scalar distance function"
            ))
            .is_none());
        assert!(format
            .render(&fixed_event("a", Severity::Info, "shown"))
            .is_some());
    }

    #[test]
    fn test_memory_sink_keeps_last_lines() {
        let mut sink = MemorySink::new(2, LineFormat::default());
        let reader = sink.clone();

        for i in 0..3 {
            sink.write(&fixed_event("m", Severity::Info, &format!("line {}", i)))
                .unwrap();
        }

        let lines = reader.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("line 1"));
        assert!(lines[1].ends_with("line 2"));
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");

        let mut sink = FileSink::new(&path, LineFormat::default()).unwrap();
        sink.write(&fixed_event("file", Severity::Error, "first")).unwrap();
        sink.close().unwrap();

        let mut sink = FileSink::new(&path, LineFormat::default()).unwrap();
        sink.write(&fixed_event("file", Severity::Error, "second")).unwrap();
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ERROR   : first"));
        assert!(lines[1].ends_with("ERROR   : second"));
    }
}
