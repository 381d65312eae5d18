//! Multi-producer, single-consumer transport for log events.
//!
//! Built on a `flume` channel. Closing is explicit rather than tied to the
//! last sender being dropped, because producers hold sender clones for their
//! whole lifetime. The close flag and every send are mutually excluded: an
//! event is either rejected with `ChannelClosed` or is guaranteed to sit ahead
//! of the end-of-stream marker, so the consumer never loses an accepted event.

use crate::types::LogEvent;
use hsu_common::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on queued events before producers block.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

const CHANNEL_NAME: &str = "log-records";

enum Envelope {
    Record(LogEvent),
    Close,
}

struct Shared {
    closed: RwLock<bool>,
}

/// Create a channel. `None` gives an unbounded queue.
pub fn record_channel(capacity: Option<usize>) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = match capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    };
    let shared = Arc::new(Shared {
        closed: RwLock::new(false),
    });

    (
        RecordSender {
            tx,
            shared: Arc::clone(&shared),
        },
        RecordReceiver {
            rx,
            finished: false,
        },
    )
}

/// Producer side. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct RecordSender {
    tx: flume::Sender<Envelope>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecordSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSender")
            .field("pending", &self.tx.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RecordSender {
    /// Enqueue an event, blocking while a bounded channel is full.
    ///
    /// # Errors
    /// - `Error::ChannelClosed` if the channel was closed or the consumer is gone
    pub fn send(&self, event: LogEvent) -> Result<()> {
        let closed = self.shared.closed.read();
        if *closed {
            return Err(Error::channel_closed(CHANNEL_NAME));
        }
        self.tx
            .send(Envelope::Record(event))
            .map_err(|_| Error::channel_closed(CHANNEL_NAME))
    }

    /// Stop accepting events. Already-queued events still drain.
    ///
    /// Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        let mut closed = self.shared.closed.write();
        if *closed {
            return false;
        }
        *closed = true;
        // A missing consumer has nothing left to drain
        let _ = self.tx.send(Envelope::Close);
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.read()
    }

    /// Events queued but not yet received.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer side. Owned by exactly one listener.
pub struct RecordReceiver {
    rx: flume::Receiver<Envelope>,
    finished: bool,
}

impl RecordReceiver {
    /// Block until an event arrives. `None` means end-of-stream.
    pub fn recv(&mut self) -> Option<LogEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(Envelope::Record(event)) => Some(event),
            Ok(Envelope::Close) | Err(_) => {
                self.finished = true;
                None
            }
        }
    }

    /// Like [`RecordReceiver::recv`] but gives up after `timeout`.
    ///
    /// `None` means either a timeout or end-of-stream; check
    /// [`RecordReceiver::is_finished`] to tell them apart.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<LogEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(Envelope::Record(event)) => Some(event),
            Ok(Envelope::Close) | Err(flume::RecvTimeoutError::Disconnected) => {
                self.finished = true;
                None
            }
            Err(flume::RecvTimeoutError::Timeout) => None,
        }
    }

    /// Whether end-of-stream has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
