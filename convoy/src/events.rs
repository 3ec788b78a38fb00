use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::worker::Operation;

/// Metadata envelope attached to every lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub runner_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(runner_id: Uuid) -> Self {
        Self {
            version: 1,
            runner_id,
            timestamp: Utc::now(),
        }
    }
}

/// A lifecycle event with metadata and payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub meta: EventMeta,
    pub payload: LifecycleEventPayload,
}

impl LifecycleEvent {
    pub fn new(runner_id: Uuid, payload: LifecycleEventPayload) -> Self {
        Self {
            meta: EventMeta::new(runner_id),
            payload,
        }
    }
}

/// Event payload emitted as a runner moves through its lifecycle.
///
/// Error values are carried as rendered strings so events stay cheap to
/// clone across broadcast subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LifecycleEventPayload {
    /// An operation is about to be fanned out over these services.
    OperationStarted {
        operation: Operation,
        services: Vec<String>,
    },
    /// Every service completed the operation successfully.
    OperationCompleted {
        operation: Operation,
        services: Vec<String>,
    },
    /// The operation failed for at least one service.
    OperationFailed {
        operation: Operation,
        failed: Vec<String>,
    },
    /// A single worker's call failed.
    WorkerFailed {
        service: String,
        operation: Operation,
        error: String,
    },
    /// The stop issued after a failed wait also failed.
    RecoveryFailed {
        /// The service whose wait failure triggered recovery.
        trigger: String,
        failed: Vec<String>,
        error: String,
    },
    /// A wait that was no longer being observed finished with an error.
    StragglerFailed {
        service: String,
        operation: Operation,
        error: String,
    },
    /// Session teardown failed after the session body had already failed.
    TeardownFailed {
        operation: Operation,
        failed: Vec<String>,
        error: String,
    },
}

/// Receives lifecycle events from a runner.
///
/// Injected at runner construction. Implementations must not block: they
/// are called inline from fan-out and recovery paths.
pub trait LifecycleObserver: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Observer that writes every event to `tracing`.
///
/// This is the default observer of a runner built without one.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn notify(&self, event: LifecycleEvent) {
        let runner_id = event.meta.runner_id;
        match event.payload {
            LifecycleEventPayload::OperationStarted {
                operation,
                services,
            } => {
                tracing::trace!(%runner_id, %operation, ?services, "operation dispatched");
            }
            LifecycleEventPayload::OperationCompleted {
                operation,
                services,
            } => {
                tracing::trace!(%runner_id, %operation, ?services, "operation completed");
            }
            LifecycleEventPayload::OperationFailed { operation, failed } => {
                tracing::warn!(%runner_id, %operation, ?failed, "operation failed");
            }
            LifecycleEventPayload::WorkerFailed {
                service,
                operation,
                error,
            } => {
                tracing::warn!(%runner_id, %service, %operation, %error, "service failed");
            }
            LifecycleEventPayload::RecoveryFailed {
                trigger,
                failed,
                error,
            } => {
                tracing::error!(
                    %runner_id,
                    %trigger,
                    ?failed,
                    %error,
                    "failed to stop peers after service failure"
                );
            }
            LifecycleEventPayload::StragglerFailed {
                service,
                operation,
                error,
            } => {
                tracing::warn!(
                    %runner_id,
                    %service,
                    %operation,
                    %error,
                    "unobserved service failed after an earlier failure"
                );
            }
            LifecycleEventPayload::TeardownFailed {
                operation,
                failed,
                error,
            } => {
                tracing::error!(%runner_id, %operation, ?failed, %error, "session teardown failed");
            }
        }
    }
}

/// Observer that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn notify(&self, _event: LifecycleEvent) {}
}

/// In-process event bus using a tokio broadcast channel.
///
/// Events are broadcast to all active subscribers. A subscriber that falls
/// behind receives `RecvError::Lagged` but never blocks the runner. Events
/// published while nobody is subscribed are dropped. Every event is also
/// forwarded to `tracing` via [`TracingObserver`] when `trace` is enabled.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(LifecycleEventBus::new(256));
/// let mut events = bus.subscribe();
///
/// let runner = ServiceRunnerBuilder::new(config)
///     .with_observer(bus.clone())
///     .build();
/// ```
pub struct LifecycleEventBus {
    sender: broadcast::Sender<LifecycleEvent>,
    capacity: usize,
    trace: bool,
}

impl fmt::Debug for LifecycleEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .field("trace", &self.trace)
            .finish()
    }
}

impl LifecycleEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            trace: true,
        }
    }

    /// Disable or enable forwarding events to `tracing`.
    pub fn with_tracing(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl LifecycleObserver for LifecycleEventBus {
    fn notify(&self, event: LifecycleEvent) {
        if self.trace {
            TracingObserver.notify(event.clone());
        }
        // No subscribers is not an error for a lifecycle bus.
        let _ = self.sender.send(event);
    }
}
