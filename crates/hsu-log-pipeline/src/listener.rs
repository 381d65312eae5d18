//! The single consumer of the record channel.
//!
//! One dedicated thread owns the receiver and every sink. It dispatches events
//! in the order they arrived on the channel and exits once the channel reports
//! end-of-stream, flushing and closing the sinks on the way out. Because it is
//! the only writer, sinks need no synchronization.
//!
//! ## Shutdown
//!
//! [`AggregatorListener::stop`] closes the channel and joins the thread. The
//! close marker is queued behind everything already accepted, so every event
//! enqueued before the stop is written before `stop` returns. Stopping twice
//! is a no-op.

use crate::channel::{RecordReceiver, RecordSender};
use crate::output::Sink;
use hsu_common::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

const LISTENER_THREAD_NAME: &str = "hsu-log-listener";

/// Handle to the running listener thread.
pub struct AggregatorListener {
    sender: RecordSender,
    handle: Mutex<Option<JoinHandle<()>>>,
    dispatched: Arc<AtomicU64>,
}

impl std::fmt::Debug for AggregatorListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorListener")
            .field("running", &self.is_running())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

impl AggregatorListener {
    /// Spawn the listener thread.
    ///
    /// `sender` is kept so that `stop` can close the channel; producers use
    /// their own clones.
    pub fn start(
        sender: RecordSender,
        receiver: RecordReceiver,
        sinks: Vec<Box<dyn Sink>>,
    ) -> Result<Self> {
        let dispatched = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dispatched);
        let sink_count = sinks.len();

        let handle = std::thread::Builder::new()
            .name(LISTENER_THREAD_NAME.to_string())
            .spawn(move || Self::run(receiver, sinks, counter))
            .map_err(|e| Error::thread(LISTENER_THREAD_NAME, e.to_string()))?;

        info!(sinks = sink_count, "Log listener started");

        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
            dispatched,
        })
    }

    /// Close the channel, wait for every queued event to be written, and join.
    ///
    /// Returns `true` if this call performed the shutdown, `false` if the
    /// listener had already been stopped.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.handle.lock().take() else {
            return false;
        };

        self.sender.close();

        if handle.join().is_err() {
            error!("Log listener thread panicked during shutdown");
        } else {
            info!(
                dispatched = self.dispatched(),
                "Log listener stopped"
            );
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Events handed to the sinks so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    fn run(mut receiver: RecordReceiver, mut sinks: Vec<Box<dyn Sink>>, dispatched: Arc<AtomicU64>) {
        debug!("Log listener loop started");

        while let Some(event) = receiver.recv() {
            for sink in sinks.iter_mut() {
                if let Err(e) = sink.write(&event) {
                    warn!(sink = sink.name(), error = %e, "Failed to write log event");
                }
            }
            dispatched.fetch_add(1, Ordering::SeqCst);
        }

        for sink in sinks.iter_mut() {
            if let Err(e) = sink.close() {
                warn!(sink = sink.name(), error = %e, "Error closing sink");
            }
        }

        debug!(
            dispatched = dispatched.load(Ordering::SeqCst),
            "Log listener loop finished"
        );
    }
}

impl Drop for AggregatorListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::record_channel;
    use crate::output::{LineFormat, MemorySink};
    use crate::types::{LogEvent, Severity};

    fn memory() -> MemorySink {
        MemorySink::new(10_000, LineFormat::default())
    }

    #[test]
    fn test_dispatches_in_order_and_drains_on_stop() {
        let (tx, rx) = record_channel(Some(16));
        let sink = memory();
        let listener = AggregatorListener::start(tx.clone(), rx, vec![Box::new(sink.clone())]).unwrap();

        for i in 0..500 {
            tx.send(LogEvent::new("order", Severity::Info, format!("event {}", i)))
                .unwrap();
        }
        assert!(listener.stop());

        let lines = sink.lines();
        assert_eq!(lines.len(), 500);
        for (i, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!(": event {}", i)), "{}", line);
        }
        assert_eq!(listener.dispatched(), 500);
    }

    #[test]
    fn test_double_stop_is_noop() {
        let (tx, rx) = record_channel(None);
        let sink = memory();
        let listener = AggregatorListener::start(tx.clone(), rx, vec![Box::new(sink.clone())]).unwrap();

        tx.send(LogEvent::new("stop", Severity::Info, "only once")).unwrap();
        assert!(listener.stop());
        assert!(!listener.stop());

        assert_eq!(sink.len(), 1);
        assert_eq!(listener.dispatched(), 1);
        assert!(!listener.is_running());
    }

    #[test]
    fn test_send_after_stop_fails() {
        let (tx, rx) = record_channel(Some(4));
        let listener = AggregatorListener::start(tx.clone(), rx, Vec::new()).unwrap();
        listener.stop();

        assert!(tx
            .send(LogEvent::new("late", Severity::Info, "x"))
            .unwrap_err()
            .is_channel_closed());
    }

    #[test]
    fn test_fans_out_to_every_sink() {
        let (tx, rx) = record_channel(Some(4));
        let first = memory();
        let second = MemorySink::new(
            100,
            LineFormat {
                min_level: Severity::Error,
                ..LineFormat::default()
            },
        );
        let listener = AggregatorListener::start(
            tx.clone(),
            rx,
            vec![Box::new(first.clone()), Box::new(second.clone())],
        )
        .unwrap();

        tx.send(LogEvent::new("fan", Severity::Info, "info")).unwrap();
        tx.send(LogEvent::new("fan", Severity::Error, "error")).unwrap();
        listener.stop();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
    }
}
