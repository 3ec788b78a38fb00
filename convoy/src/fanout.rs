use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use crate::error::{AggregateFailure, WorkerFailure};
use crate::events::{LifecycleEvent, LifecycleEventPayload, LifecycleObserver};
use crate::telemetry;
use crate::worker::{Operation, ServiceWorker};

/// A named worker handle, as held by a runner's registry.
pub type Target = (String, Arc<dyn ServiceWorker>);

/// How a fan-out reports the outcomes of its tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Policy {
    /// Wait for every task, then report all failures together.
    Aggregate,
    /// Return on the first failure, or once every task has succeeded.
    FailFast,
}

/// Outcome of [`FanOut::apply`] when at least one task failed.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// Failures collected under [`Policy::Aggregate`].
    #[error(transparent)]
    Aggregate(#[from] AggregateFailure),
    /// First failure observed under [`Policy::FailFast`].
    #[error(transparent)]
    Worker(#[from] WorkerFailure),
}

type Joined = (String, Result<anyhow::Result<()>, JoinError>);

/// Invokes one operation on every target concurrently.
///
/// Each target runs in its own spawned task, so a slow or failing worker
/// never delays the dispatch of the others. A `FanOut` holds a snapshot of
/// its targets and is meant to be built for a single call.
pub struct FanOut {
    runner_id: Uuid,
    targets: Vec<Target>,
    observer: Arc<dyn LifecycleObserver>,
}

impl fmt::Debug for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<&str> = self.targets.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("FanOut")
            .field("runner_id", &self.runner_id)
            .field("services", &services)
            .finish()
    }
}

impl FanOut {
    /// Create an executor over `targets`, reporting events to `observer`.
    pub fn new(
        runner_id: Uuid,
        targets: Vec<Target>,
        observer: Arc<dyn LifecycleObserver>,
    ) -> Self {
        Self {
            runner_id,
            targets,
            observer,
        }
    }

    /// Run `operation` on every target under `policy`.
    pub async fn apply(&self, operation: Operation, policy: Policy) -> Result<(), FanOutError> {
        match policy {
            Policy::Aggregate => self.aggregate(operation).await?,
            Policy::FailFast => self.fail_fast(operation).await?,
        }
        Ok(())
    }

    /// Run `operation` on every target and wait for all of them.
    ///
    /// Every target receives the call regardless of how the others fare.
    /// Fails with every collected failure if any task failed.
    pub async fn aggregate(&self, operation: Operation) -> Result<(), AggregateFailure> {
        self.emit(LifecycleEventPayload::OperationStarted {
            operation,
            services: self.service_names(),
        });

        let (services, handles): (Vec<_>, Vec<_>) =
            self.spawn_all(operation).into_iter().unzip();
        let attempted = services.len();
        let outcomes = futures::future::join_all(handles).await;

        let failures: Vec<WorkerFailure> = services
            .into_iter()
            .zip(outcomes)
            .filter_map(|(service, joined)| settle(service, operation, joined).err())
            .collect();

        if failures.is_empty() {
            self.emit(LifecycleEventPayload::OperationCompleted {
                operation,
                services: self.service_names(),
            });
            return Ok(());
        }

        for failure in &failures {
            self.emit_failure(failure);
        }
        self.emit(LifecycleEventPayload::OperationFailed {
            operation,
            failed: failures.iter().map(|f| f.service.clone()).collect(),
        });

        Err(AggregateFailure {
            operation,
            attempted,
            failures,
        })
    }

    /// Run `operation` on every target, returning at the first failure.
    ///
    /// On failure the remaining tasks are neither cancelled nor awaited by
    /// the caller; a detached task drains them and reports any further
    /// failures to the observer as stragglers.
    pub async fn fail_fast(&self, operation: Operation) -> Result<(), WorkerFailure> {
        self.emit(LifecycleEventPayload::OperationStarted {
            operation,
            services: self.service_names(),
        });

        let mut pending: FuturesUnordered<_> = self
            .spawn_all(operation)
            .into_iter()
            .map(|(service, handle)| async move { (service, handle.await) })
            .collect();

        while let Some((service, joined)) = pending.next().await {
            if let Err(failure) = settle(service, operation, joined) {
                self.emit_failure(&failure);
                self.emit(LifecycleEventPayload::OperationFailed {
                    operation,
                    failed: vec![failure.service.clone()],
                });
                if !pending.is_empty() {
                    self.drain_stragglers(operation, pending);
                }
                return Err(failure);
            }
        }

        self.emit(LifecycleEventPayload::OperationCompleted {
            operation,
            services: self.service_names(),
        });
        Ok(())
    }

    fn spawn_all(&self, operation: Operation) -> Vec<(String, JoinHandle<anyhow::Result<()>>)> {
        self.targets
            .iter()
            .map(|(service, worker)| {
                let worker = Arc::clone(worker);
                let name = service.clone();
                let call = async move {
                    let started = Instant::now();
                    let result = operation.invoke(worker.as_ref()).await;
                    telemetry::record_worker_outcome(&name, operation, started, &result);
                    result
                };
                let handle = tokio::spawn(telemetry::instrument_worker(
                    service.clone(),
                    operation,
                    call,
                ));
                (service.clone(), handle)
            })
            .collect()
    }

    fn drain_stragglers<S>(&self, operation: Operation, mut pending: S)
    where
        S: futures::Stream<Item = Joined> + Send + Unpin + 'static,
    {
        let observer = Arc::clone(&self.observer);
        let runner_id = self.runner_id;

        tokio::spawn(async move {
            while let Some((service, joined)) = pending.next().await {
                if let Err(failure) = settle(service, operation, joined) {
                    observer.notify(LifecycleEvent::new(
                        runner_id,
                        LifecycleEventPayload::StragglerFailed {
                            service: failure.service,
                            operation,
                            error: format!("{:#}", failure.source),
                        },
                    ));
                }
            }
        });
    }

    fn service_names(&self) -> Vec<String> {
        self.targets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn emit_failure(&self, failure: &WorkerFailure) {
        self.emit(LifecycleEventPayload::WorkerFailed {
            service: failure.service.clone(),
            operation: failure.operation,
            error: format!("{:#}", failure.source),
        });
    }

    fn emit(&self, payload: LifecycleEventPayload) {
        self.observer.notify(LifecycleEvent::new(self.runner_id, payload));
    }
}

fn settle(
    service: String,
    operation: Operation,
    joined: Result<anyhow::Result<()>, JoinError>,
) -> Result<(), WorkerFailure> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(WorkerFailure::new(service, operation, err)),
        Err(join_err) => Err(WorkerFailure::new(
            service,
            operation,
            anyhow::anyhow!("worker task aborted: {join_err}"),
        )),
    }
}
