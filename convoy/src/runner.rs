use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::{AggregateFailure, ContractViolation, RegistrationError, WorkerFailure};
use crate::events::{LifecycleEvent, LifecycleEventPayload, LifecycleObserver, TracingObserver};
use crate::fanout::{FanOut, Target};
use crate::telemetry;
use crate::worker::{ContainerFactory, Operation, ServiceWorker};

/// Where a runner is in its lifecycle.
///
/// There is no failed state: failures are reported by the call that
/// observed them and leave the state where that call moved it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// No services registered.
    Empty,
    /// Services registered, not yet started.
    Populated,
    /// `start` has been called.
    Started,
    /// `stop` has been called, directly or after a failed `wait`.
    Stopped,
    /// `kill` has been called.
    Killed,
}

impl RunnerState {
    /// Whether services may still be registered.
    pub fn accepts_services(&self) -> bool {
        matches!(self, RunnerState::Empty | RunnerState::Populated)
    }
}

/// Serves a number of services concurrently as one unit.
///
/// Services are registered by name before [`start`](Self::start). Every
/// lifecycle call is fanned out to all registered workers at once:
/// `start`, `stop` and `kill` attempt every worker and report all failures
/// together, while `wait` returns at the first worker failure after stopping
/// the remaining services.
///
/// # Example
///
/// ```ignore
/// let mut runner = ServiceRunner::new(RunnerConfig::new("edge"));
/// runner.add_service(&factory, billing)?;
/// runner.add_service(&factory, search)?;
///
/// runner.start().await?;
/// runner.wait().await?;
/// ```
pub struct ServiceRunner {
    id: Uuid,
    config: RunnerConfig,
    services: BTreeMap<String, Arc<dyn ServiceWorker>>,
    state: Mutex<RunnerState>,
    observer: Arc<dyn LifecycleObserver>,
}

impl fmt::Debug for ServiceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRunner")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("services", &self.service_names())
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceRunner {
    /// Create an empty runner that reports lifecycle events to `tracing`.
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    /// Create an empty runner that reports lifecycle events to `observer`.
    pub fn with_observer(config: RunnerConfig, observer: Arc<dyn LifecycleObserver>) -> Self {
        Self {
            id: Uuid::now_v7(),
            config,
            services: BTreeMap::new(),
            state: Mutex::new(RunnerState::Empty),
            observer,
        }
    }

    /// Unique identifier of this runner, attached to its events and spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The configuration this runner was created with.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    /// Registered service names, in sorted order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Registered workers with their names.
    pub fn workers(&self) -> impl Iterator<Item = (&str, &Arc<dyn ServiceWorker>)> {
        self.services.iter().map(|(name, worker)| (name.as_str(), worker))
    }

    /// Worker registered under `name`.
    pub fn worker(&self, name: &str) -> Option<&Arc<dyn ServiceWorker>> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Register `worker` under `name`.
    ///
    /// A worker already registered under the same name is replaced and will
    /// never receive any lifecycle call. Fails once `start` has been called.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        worker: Arc<dyn ServiceWorker>,
    ) -> Result<(), ContractViolation> {
        let name = name.into();
        if name.is_empty() {
            return Err(ContractViolation::EmptyServiceName);
        }

        let mut state = self.state.lock();
        if !state.accepts_services() {
            return Err(ContractViolation::AddAfterStart { service: name });
        }

        if self.services.insert(name.clone(), worker).is_some() {
            tracing::debug!(service = %name, "replacing previously registered service");
        }
        *state = RunnerState::Populated;
        Ok(())
    }

    /// Build a worker for `definition` with `factory` and register it.
    ///
    /// Returns the name the service was registered under.
    pub fn add_service<F>(
        &mut self,
        factory: &F,
        definition: F::Definition,
    ) -> Result<String, RegistrationError>
    where
        F: ContainerFactory + ?Sized,
    {
        let service = factory.service_name(&definition);
        let worker = factory
            .build(definition, &self.config)
            .map_err(|source| RegistrationError::Build {
                service: service.clone(),
                source,
            })?;
        self.add(service.clone(), worker)?;
        Ok(service)
    }

    /// Start all registered services concurrently.
    ///
    /// Blocks until every service has finished its startup routine. Services
    /// that started are left running when others fail; callers decide
    /// whether to `stop` or `kill` them.
    pub async fn start(&self) -> Result<(), AggregateFailure> {
        self.run_to_completion(Operation::Start, RunnerState::Started, "starting", "started")
            .await
    }

    /// Stop all services concurrently, blocking until every one has stopped.
    pub async fn stop(&self) -> Result<(), AggregateFailure> {
        self.run_to_completion(Operation::Stop, RunnerState::Stopped, "stopping", "stopped")
            .await
    }

    /// Kill all services concurrently, blocking until every one has stopped.
    pub async fn kill(&self) -> Result<(), AggregateFailure> {
        self.run_to_completion(Operation::Kill, RunnerState::Killed, "killing", "killed")
            .await
    }

    /// Wait for all running services to stop.
    ///
    /// If any service fails, its peers are stopped and that service's failure
    /// is returned as-is. A failure of the recovery stop does not replace it;
    /// it is reported to the observer as [`LifecycleEventPayload::RecoveryFailed`].
    pub async fn wait(&self) -> Result<(), WorkerFailure> {
        let span = telemetry::runner_span(self.id, &self.config.label, Operation::Wait);
        async {
            let failure = match self.fan_out().fail_fast(Operation::Wait).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };

            tracing::warn!(
                service = %failure.service,
                error = %failure.source,
                "service failed, stopping its peers"
            );
            if let Err(recovery) = self.stop().await {
                self.notify(LifecycleEventPayload::RecoveryFailed {
                    trigger: failure.service.clone(),
                    failed: recovery.failures.iter().map(|f| f.service.clone()).collect(),
                    error: recovery.to_string(),
                });
            }
            Err(failure)
        }
        .instrument(span)
        .await
    }

    async fn run_to_completion(
        &self,
        operation: Operation,
        next: RunnerState,
        doing: &str,
        done: &str,
    ) -> Result<(), AggregateFailure> {
        *self.state.lock() = next;
        let names = self.service_names().join(", ");
        let span = telemetry::runner_span(self.id, &self.config.label, operation);

        async {
            tracing::info!("{doing} services: {names}");
            self.fan_out().aggregate(operation).await?;
            tracing::debug!("services {done}: {names}");
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn fan_out(&self) -> FanOut {
        let targets: Vec<Target> = self
            .services
            .iter()
            .map(|(name, worker)| (name.clone(), Arc::clone(worker)))
            .collect();
        FanOut::new(self.id, targets, Arc::clone(&self.observer))
    }

    pub(crate) fn notify(&self, payload: LifecycleEventPayload) {
        self.observer.notify(LifecycleEvent::new(self.id, payload));
    }
}

/// Builder for a [`ServiceRunner`] with explicit collaborators.
///
/// # Example
///
/// ```ignore
/// let runner = ServiceRunnerBuilder::new(config)
///     .with_observer(bus.clone())
///     .with_service("billing", billing)
///     .build()?;
/// ```
pub struct ServiceRunnerBuilder {
    config: RunnerConfig,
    observer: Option<Arc<dyn LifecycleObserver>>,
    services: Vec<Target>,
}

impl fmt::Debug for ServiceRunnerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<&str> = self.services.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("ServiceRunnerBuilder")
            .field("config", &self.config)
            .field("observer_set", &self.observer.is_some())
            .field("services", &services)
            .finish()
    }
}

impl ServiceRunnerBuilder {
    /// Create a new builder with the given runner configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            observer: None,
            services: Vec::new(),
        }
    }

    /// Set the lifecycle observer. Defaults to [`TracingObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Register a worker. Later registrations replace earlier ones of the same name.
    pub fn with_service(mut self, name: impl Into<String>, worker: Arc<dyn ServiceWorker>) -> Self {
        self.services.push((name.into(), worker));
        self
    }

    /// Build the runner.
    ///
    /// # Errors
    ///
    /// Returns an error if a service was given an empty name.
    pub fn build(self) -> Result<ServiceRunner, ContractViolation> {
        let observer = self.observer.unwrap_or_else(|| Arc::new(TracingObserver));
        let mut runner = ServiceRunner::with_observer(self.config, observer);
        for (name, worker) in self.services {
            runner.add(name, worker)?;
        }
        Ok(runner)
    }
}
