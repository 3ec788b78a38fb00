use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::config::{RunnerConfig, SessionOptions};
use crate::error::{AggregateFailure, SessionError};
use crate::events::{LifecycleEventPayload, LifecycleObserver, TracingObserver};
use crate::runner::ServiceRunner;
use crate::worker::{ContainerFactory, Operation};

/// Serve `definitions` for the duration of `body`.
///
/// Services are stopped when `body` completes, or killed if
/// `options.kill_on_exit` is set. Returns the value produced by `body`.
///
/// # Example
///
/// ```ignore
/// let total = run_services(config, &factory, [billing, search], SessionOptions::default(), |runner| async move {
///     // interact with the running services
///     Ok(runner.len())
/// })
/// .await?;
/// // services stopped
/// ```
pub async fn run_services<F, I, B, Fut, T>(
    config: RunnerConfig,
    factory: &F,
    definitions: I,
    options: SessionOptions,
    body: B,
) -> Result<T, SessionError>
where
    F: ContainerFactory + ?Sized,
    I: IntoIterator<Item = F::Definition>,
    B: FnOnce(Arc<ServiceRunner>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    ServiceSession::new(config)
        .with_options(options)
        .run(factory, definitions, body)
        .await
}

/// Configurable form of [`run_services`].
pub struct ServiceSession {
    config: RunnerConfig,
    options: SessionOptions,
    observer: Arc<dyn LifecycleObserver>,
}

impl std::fmt::Debug for ServiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSession")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ServiceSession {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            options: SessionOptions::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Kill rather than stop services on exit.
    pub fn kill_on_exit(mut self, kill_on_exit: bool) -> Self {
        self.options.kill_on_exit = kill_on_exit;
        self
    }

    /// Set the lifecycle observer of the session's runner.
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Register and start `definitions`, run `body`, then tear down.
    ///
    /// If starting fails, services that did start are torn down before the
    /// start failure is returned. If `body` fails or panics and teardown then
    /// fails too, the body's outcome wins and the teardown failure is
    /// reported to the observer.
    pub async fn run<F, I, B, Fut, T>(
        self,
        factory: &F,
        definitions: I,
        body: B,
    ) -> Result<T, SessionError>
    where
        F: ContainerFactory + ?Sized,
        I: IntoIterator<Item = F::Definition>,
        B: FnOnce(Arc<ServiceRunner>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let exit = self.options.exit_operation();
        let mut runner = ServiceRunner::with_observer(self.config, self.observer);
        for definition in definitions {
            runner.add_service(factory, definition)?;
        }
        let runner = Arc::new(runner);

        if let Err(failure) = runner.start().await {
            tracing::warn!(error = %failure, "session failed to start, tearing down");
            if let Err(released) = teardown(&runner, exit).await {
                report_teardown_failure(&runner, &released);
            }
            return Err(SessionError::Start(failure));
        }

        let session = Arc::clone(&runner);
        let outcome = AssertUnwindSafe(async move { body(session).await })
            .catch_unwind()
            .await;
        let released = teardown(&runner, exit).await;

        match outcome {
            Ok(Ok(value)) => released.map(|()| value).map_err(SessionError::Teardown),
            Ok(Err(error)) => {
                if let Err(failure) = released {
                    report_teardown_failure(&runner, &failure);
                }
                Err(SessionError::Body(error))
            }
            Err(panic) => {
                if let Err(failure) = released {
                    report_teardown_failure(&runner, &failure);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

async fn teardown(runner: &ServiceRunner, exit: Operation) -> Result<(), AggregateFailure> {
    match exit {
        Operation::Kill => runner.kill().await,
        _ => runner.stop().await,
    }
}

fn report_teardown_failure(runner: &ServiceRunner, failure: &AggregateFailure) {
    runner.notify(LifecycleEventPayload::TeardownFailed {
        operation: failure.operation,
        failed: failure.failed_services().into_iter().map(str::to_owned).collect(),
        error: failure.to_string(),
    });
}
