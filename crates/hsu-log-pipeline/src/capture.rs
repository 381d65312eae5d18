//! Capture of raw subprocess output through an anonymous pipe.
//!
//! A [`PipeCapture`] owns both ends of an OS pipe. The write end is handed to
//! a child (usually as its stderr); a dedicated reader thread owns the read
//! end and keeps the most recent lines in a bounded ring buffer. Nothing
//! reaches the log until the owner calls [`PipeCapture::drain`], which turns
//! each buffered line into a log event on the capture's logger.
//!
//! ## States
//!
//! ```text
//!   Open ──close()──► Closing ──reader sees EOF──► Closed
//! ```
//!
//! The pipe only reports EOF once *every* write end is gone, including the
//! duplicates given to children, so `Closing` lasts until the child exits.
//!
//! Buffered lines are diagnostic context, not a record of truth: when the
//! buffer is full the oldest line is discarded, and a line longer than
//! `max_line_bytes` keeps only its first `max_line_bytes` bytes. Memory held
//! by a capture is therefore bounded by `capacity * max_line_bytes`.

use crate::config::{
    LoggingConfig, DEFAULT_CAPTURE_CAPACITY, DEFAULT_MAX_LINE_BYTES, DEFAULT_READER_JOIN_TIMEOUT,
};
use crate::logger::Logger;
use crate::scrub::{default_scrubber, Scrubber};
use crate::types::Severity;
use hsu_common::{Error, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Reader running, owner still holds the write end.
    Open,
    /// Owner closed its write end; reader waiting for EOF.
    Closing,
    /// Reader exited; buffer is frozen.
    Closed,
}

/// Per-capture settings.
#[derive(Clone)]
pub struct CaptureOptions {
    /// Lines kept in the ring buffer
    pub capacity: usize,
    /// Bytes kept from a single line; the rest of the line is dropped
    pub max_line_bytes: usize,
    /// Severity drained lines are logged at
    pub severity: Severity,
    /// Applied to every line before it is buffered
    pub scrubber: Scrubber,
    /// How long `shutdown` waits for the reader thread
    pub join_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPTURE_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            severity: Severity::Error,
            scrubber: default_scrubber(),
            join_timeout: DEFAULT_READER_JOIN_TIMEOUT,
        }
    }
}

impl CaptureOptions {
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            capacity: config.capture_capacity,
            max_line_bytes: config.max_line_bytes,
            severity: config.capture_level,
            join_timeout: config.reader_join_timeout,
            ..Self::default()
        }
    }

    pub fn with_scrubber(mut self, scrubber: Scrubber) -> Self {
        self.scrubber = scrubber;
        self
    }
}

impl std::fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("capacity", &self.capacity)
            .field("max_line_bytes", &self.max_line_bytes)
            .field("severity", &self.severity)
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity ring of the most recent lines.
#[derive(Debug)]
struct CaptureBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl CaptureBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` if a line was evicted to make room.
    fn push(&mut self, line: String) -> bool {
        let evicted = if self.lines.len() == self.capacity {
            self.lines.pop_front();
            true
        } else {
            false
        };
        self.lines.push_back(line);
        evicted
    }

    fn pop(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Put a line back at the head unless newer lines have filled the ring.
    fn restore(&mut self, line: String) {
        if self.lines.len() < self.capacity {
            self.lines.push_front(line);
        }
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Counters updated by the reader thread.
#[derive(Debug, Default)]
struct CaptureStats {
    lines_read: AtomicU64,
    evicted: AtomicU64,
    truncated: AtomicU64,
}

/// Handle owning a pipe, its reader thread and the captured lines.
pub struct PipeCapture {
    logger: Logger,
    severity: Severity,
    join_timeout: Duration,
    buffer: Arc<Mutex<CaptureBuffer>>,
    // Serializes whole drains; `buffer` is still released after every pop
    drain_lock: Mutex<()>,
    stats: Arc<CaptureStats>,
    writer: Mutex<Option<OwnedFd>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    finished: Arc<AtomicBool>,
    done_rx: flume::Receiver<()>,
}

impl std::fmt::Debug for PipeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeCapture")
            .field("logger", &self.logger.name())
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl PipeCapture {
    /// Allocate a pipe and start the reader thread.
    ///
    /// The capture is live as soon as this returns: anything written to the
    /// write end from now on is buffered.
    pub fn start(logger: Logger, options: CaptureOptions) -> Result<Self> {
        let name = logger.name().to_string();

        let (read_fd, write_fd) =
            nix::unistd::pipe().map_err(|e| Error::pipe(&name, format!("Failed to create pipe: {}", e)))?;
        // Keep both ends out of unrelated children; `child_stdio` hands out explicit duplicates.
        for fd in [&read_fd, &write_fd] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(|e| Error::pipe(&name, format!("Failed to set close-on-exec: {}", e)))?;
        }

        let buffer = Arc::new(Mutex::new(CaptureBuffer::new(options.capacity)));
        let stats = Arc::new(CaptureStats::default());
        let finished = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = flume::bounded(1);

        let handle = {
            let buffer = Arc::clone(&buffer);
            let stats = Arc::clone(&stats);
            let finished = Arc::clone(&finished);
            let scrubber = options.scrubber.clone();
            let reader_name = name.clone();
            let max_line_bytes = options.max_line_bytes.max(1);

            std::thread::Builder::new()
                .name(thread_name(&name))
                .spawn(move || {
                    let pipe = File::from(read_fd);
                    Self::read_lines(&reader_name, pipe, max_line_bytes, &scrubber, &buffer, &stats);
                    finished.store(true, Ordering::SeqCst);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::thread(&name, e.to_string()))?
        };

        debug!(logger = %name, capacity = options.capacity, "Pipe capture started");

        Ok(Self {
            logger,
            severity: options.severity,
            join_timeout: options.join_timeout,
            buffer,
            drain_lock: Mutex::new(()),
            stats,
            writer: Mutex::new(Some(write_fd)),
            reader: Mutex::new(Some(handle)),
            finished,
            done_rx,
        })
    }

    fn read_lines(
        name: &str,
        pipe: File,
        max_line_bytes: usize,
        scrubber: &Scrubber,
        buffer: &Mutex<CaptureBuffer>,
        stats: &CaptureStats,
    ) {
        let mut reader = BufReader::new(pipe);
        let mut raw = Vec::with_capacity(max_line_bytes.min(1024));

        loop {
            raw.clear();
            match read_capped_line(&mut reader, &mut raw, max_line_bytes) {
                Ok(CappedLine::Eof) => break,
                Ok(read) => {
                    if read == CappedLine::Truncated {
                        stats.truncated.fetch_add(1, Ordering::Relaxed);
                    }
                    let decoded = String::from_utf8_lossy(&raw);
                    let text: &str = &decoded;
                    let text = text.strip_suffix('\n').unwrap_or(text);
                    let text = text.strip_suffix('\r').unwrap_or(text);
                    let line = scrubber(text);

                    stats.lines_read.fetch_add(1, Ordering::Relaxed);
                    if buffer.lock().push(line) {
                        stats.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    warn!(logger = %name, error = %e, "Error reading from capture pipe");
                    break;
                }
            }
        }

        debug!(
            logger = %name,
            lines = stats.lines_read.load(Ordering::Relaxed),
            "Capture pipe reached end of stream"
        );
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn state(&self) -> CaptureState {
        if self.finished.load(Ordering::SeqCst) {
            CaptureState::Closed
        } else if self.writer.lock().is_some() {
            CaptureState::Open
        } else {
            CaptureState::Closing
        }
    }

    /// Raw descriptor of the write end while the capture is open.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.writer.lock().as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Duplicate of the write end, for writing from this process.
    pub fn writer(&self) -> Result<File> {
        Ok(File::from(self.duplicate_writer("writer")?))
    }

    /// Duplicate of the write end suitable for a child's stdout/stderr.
    ///
    /// The child's copy keeps the pipe open until the child exits, even after
    /// [`PipeCapture::close`].
    pub fn child_stdio(&self) -> Result<Stdio> {
        Ok(Stdio::from(self.duplicate_writer("child_stdio")?))
    }

    fn duplicate_writer(&self, operation: &str) -> Result<OwnedFd> {
        let writer = self.writer.lock();
        let fd = writer
            .as_ref()
            .ok_or_else(|| Error::capture_closed(self.logger.name(), operation))?;
        fd.try_clone().map_err(|e| {
            Error::pipe(
                self.logger.name(),
                format!("Failed to duplicate write end: {}", e),
            )
        })
    }

    /// Close the owner's write end. Does not block.
    ///
    /// # Errors
    /// - `Error::CaptureClosed` if the write end was already closed
    pub fn close(&self) -> Result<()> {
        match self.writer.lock().take() {
            Some(fd) => {
                drop(fd);
                debug!(logger = %self.logger.name(), "Capture write end closed");
                Ok(())
            }
            None => Err(Error::capture_closed(self.logger.name(), "close")),
        }
    }

    /// Log every buffered line, oldest first, emptying the buffer.
    ///
    /// Returns the number of lines handed to the logger. Safe to call from any
    /// thread and at any time; the reader keeps running.
    ///
    /// # Errors
    /// - `Error::ChannelClosed` if the logging context has shut down; the line
    ///   being drained is kept for a later attempt
    /// Concurrent drains run one after another, so lines keep their order.
    pub fn drain(&self) -> Result<usize> {
        let _draining = self.drain_lock.lock();
        let mut drained = 0;
        loop {
            // Lock per line so the reader is never blocked behind a full channel
            let Some(line) = self.buffer.lock().pop() else {
                break;
            };
            match self.logger.emit(self.severity, line.clone(), None) {
                Ok(_) => drained += 1,
                Err(e) => {
                    self.buffer.lock().restore(line);
                    return Err(e);
                }
            }
        }
        Ok(drained)
    }

    /// Lines currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Lines read from the pipe so far.
    pub fn lines_read(&self) -> u64 {
        self.stats.lines_read.load(Ordering::Relaxed)
    }

    /// Lines cut to `max_line_bytes`.
    pub fn truncated(&self) -> u64 {
        self.stats.truncated.load(Ordering::Relaxed)
    }

    /// Lines discarded because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.stats.evicted.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for the reader to reach end-of-stream.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            return true;
        }
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => true,
            Err(flume::RecvTimeoutError::Timeout) => self.finished.load(Ordering::SeqCst),
        }
    }

    /// Close the write end if needed and join the reader thread.
    ///
    /// Waits at most the configured join timeout. A reader that does not
    /// finish in time (a child still holding the pipe) is logged and left
    /// detached. Returns whether the reader was joined. Buffered lines stay
    /// drainable either way.
    pub fn shutdown(&self) -> bool {
        // Already-closed is fine here
        let _ = self.close();

        if !self.wait_closed(self.join_timeout) {
            warn!(
                logger = %self.logger.name(),
                timeout_ms = self.join_timeout.as_millis() as u64,
                "Capture reader did not finish in time; detaching"
            );
            return false;
        }

        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                warn!(logger = %self.logger.name(), "Capture reader thread panicked");
            }
        }
        true
    }
}

/// Thread names may not contain NUL.
fn thread_name(logger: &str) -> String {
    format!("hsu-pipe-{}", logger.replace('\0', "?"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CappedLine {
    Eof,
    Complete,
    Truncated,
}

/// Read one line into `raw`, keeping at most `limit` bytes of it.
///
/// Bytes past the limit are consumed up to and including the newline and
/// dropped, so `raw` never grows beyond `limit`.
fn read_capped_line<R: BufRead>(reader: &mut R, raw: &mut Vec<u8>, limit: usize) -> io::Result<CappedLine> {
    let mut consumed = 0;
    let mut truncated = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }

        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        let content = if done { used - 1 } else { used };
        let room = limit.saturating_sub(raw.len());
        if content > room {
            truncated = true;
        }
        raw.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        consumed += used;

        if done {
            break;
        }
    }

    Ok(match (consumed, truncated) {
        (0, _) => CappedLine::Eof,
        (_, true) => CappedLine::Truncated,
        (_, false) => CappedLine::Complete,
    })
}
