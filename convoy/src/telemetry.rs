//! Tracing instrumentation for runner operations.
//!
//! Spans are created for every runner-level operation and for each worker
//! call made by the fan-out executor, so that worker logs are attributed to
//! the service and operation that produced them.

use std::future::Future;
use std::time::Instant;

use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use crate::worker::Operation;

/// Create a tracing span for a runner-level operation.
#[must_use]
pub fn runner_span(runner_id: Uuid, label: &str, operation: Operation) -> Span {
    info_span!(
        "convoy.runner",
        runner_id = %runner_id,
        label = %label,
        operation = %operation,
    )
}

/// Create a tracing span for a single worker call.
#[must_use]
pub fn worker_span(service: impl AsRef<str>, operation: Operation) -> Span {
    info_span!(
        "convoy.worker",
        service = %service.as_ref(),
        operation = %operation,
    )
}

/// Instrument a worker call future with a [`worker_span`].
pub fn instrument_worker<F>(
    service: impl AsRef<str>,
    operation: Operation,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let span = worker_span(service, operation);
    future.instrument(span)
}

/// Log the outcome of a single worker call with its duration.
pub fn record_worker_outcome(
    service: &str,
    operation: Operation,
    started: Instant,
    result: &anyhow::Result<()>,
) {
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(()) => tracing::debug!(
            service = %service,
            operation = %operation,
            elapsed_ms,
            "service call completed"
        ),
        Err(err) => tracing::debug!(
            service = %service,
            operation = %operation,
            elapsed_ms,
            error = %err,
            "service call failed"
        ),
    }
}

#[cfg(test)]
pub(crate) mod capture {
    //! In-memory tracing layer for asserting on emitted events.

    use std::fmt;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};

    #[derive(Clone, Debug)]
    pub(crate) struct Captured {
        pub level: Level,
        pub message: String,
        pub fields: Vec<(String, String)>,
    }

    impl Captured {
        pub(crate) fn field(&self, name: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct CaptureLayer {
        events: Arc<Mutex<Vec<Captured>>>,
    }

    impl CaptureLayer {
        pub(crate) fn events(&self) -> Vec<Captured> {
            self.events.lock().clone()
        }

        pub(crate) fn with_message(&self, message: &str) -> Vec<Captured> {
            self.events
                .lock()
                .iter()
                .filter(|e| e.message == message)
                .cloned()
                .collect()
        }
    }

    struct Visitor<'a>(&'a mut Captured);

    impl Visit for Visitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.record_debug(field, &format_args!("{value}"));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            let value = format!("{value:?}");
            if field.name() == "message" {
                self.0.message = value;
            } else {
                self.0.fields.push((field.name().to_string(), value));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut captured = Captured {
                level: *event.metadata().level(),
                message: String::new(),
                fields: Vec::new(),
            };
            event.record(&mut Visitor(&mut captured));
            self.events.lock().push(captured);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::capture::CaptureLayer;
    use super::*;
    use tracing::Level;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_runner_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = runner_span(Uuid::nil(), "edge", Operation::Start);
            let meta = span.metadata().expect("span disabled under registry");
            assert_eq!(meta.name(), "convoy.runner");
            for field in ["runner_id", "label", "operation"] {
                assert!(meta.fields().field(field).is_some(), "missing {field}");
            }
        });
    }

    #[test]
    fn test_worker_span() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = worker_span("billing", Operation::Wait);
            let meta = span.metadata().expect("span disabled under registry");
            assert_eq!(meta.name(), "convoy.worker");
            assert!(meta.fields().field("service").is_some());
        });
    }

    #[tokio::test]
    async fn test_instrument_worker_passes_output_through() {
        let out = instrument_worker("billing", Operation::Stop, async { 7 }).await;
        assert_eq!(out, 7);
    }

    #[test]
    fn test_record_worker_outcome() {
        let capture = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            let started = Instant::now();
            record_worker_outcome("a", Operation::Start, started, &Ok(()));
            record_worker_outcome(
                "b",
                Operation::Stop,
                started,
                &Err(anyhow::anyhow!("boom")),
            );
        });

        let events = capture.events();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].level, Level::DEBUG);
        assert_eq!(events[0].message, "service call completed");
        assert_eq!(events[0].field("service"), Some("a"));
        assert_eq!(events[0].field("operation"), Some("start"));
        assert!(events[0].field("elapsed_ms").is_some());
        assert_eq!(events[0].field("error"), None);

        assert_eq!(events[1].message, "service call failed");
        assert_eq!(events[1].field("service"), Some("b"));
        assert_eq!(events[1].field("error"), Some("boom"));
    }
}
