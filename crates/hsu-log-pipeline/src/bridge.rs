//! `tracing` integration.
//!
//! [`ChannelLayer`] turns `tracing` events into log events on the record
//! channel, so code that logs through `tracing` macros shares the same sinks,
//! rate limiter and ordering as code holding a [`Logger`].
//!
//! The event target becomes the logger name. A `rate_limit_key` field puts the
//! event under rate limiting; any other structured fields are appended to the
//! message as ` key=value`.

use crate::logger::Logger;
use crate::types::Severity;
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Events from this crate never re-enter the channel.
const INTERNAL_TARGET: &str = env!("CARGO_CRATE_NAME");

const RATE_LIMIT_FIELD: &str = "rate_limit_key";

/// Layer forwarding `tracing` events into a logging context.
#[derive(Debug, Clone)]
pub struct ChannelLayer {
    logger: Logger,
}

impl ChannelLayer {
    /// Events below `logger`'s threshold are ignored.
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for ChannelLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // The listener reports through `tracing`; forwarding that would loop
        if metadata.target().starts_with(INTERNAL_TARGET) {
            return;
        }

        let severity = Severity::from(metadata.level());
        if severity < self.logger.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let key = fields.rate_limit_key.take();

        // A closed context just drops the event
        let _ = self
            .logger
            .emit_as(metadata.target(), severity, fields.into_message(), key.as_deref());
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    rate_limit_key: Option<String>,
    extra: String,
}

impl FieldCollector {
    fn into_message(self) -> String {
        let mut message = self.message.unwrap_or_default();
        message.push_str(&self.extra);
        message
    }

    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            RATE_LIMIT_FIELD => self.rate_limit_key = Some(value),
            name => {
                let _ = write!(self.extra, " {}={}", name, value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}
