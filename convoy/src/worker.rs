use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;

/// A single independently lifecycled unit of work.
///
/// Implementors decide what each operation means for their service. The
/// runner only fans these calls out and reports their outcomes; timeouts,
/// idempotence of repeated `stop`/`kill` calls, and any internal restart
/// behaviour belong to the implementation.
#[async_trait]
pub trait ServiceWorker: Send + Sync {
    /// Bring the service up. Returns once its startup routine has finished.
    async fn start(&self) -> anyhow::Result<()>;

    /// Ask the service to shut down gracefully and wait until it has.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Terminate the service immediately.
    async fn kill(&self) -> anyhow::Result<()>;

    /// Block until the service terminates on its own, or fails.
    async fn wait(&self) -> anyhow::Result<()>;
}

/// The lifecycle operations a runner can fan out over its workers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// [`ServiceWorker::start`]
    Start,
    /// [`ServiceWorker::stop`]
    Stop,
    /// [`ServiceWorker::kill`]
    Kill,
    /// [`ServiceWorker::wait`]
    Wait,
}

impl Operation {
    /// Every operation, in lifecycle order.
    pub const ALL: [Operation; 4] = [
        Operation::Start,
        Operation::Stop,
        Operation::Kill,
        Operation::Wait,
    ];

    /// Stable lowercase name, used in logs, spans and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Kill => "kill",
            Operation::Wait => "wait",
        }
    }

    /// Invoke this operation on `worker`.
    pub async fn invoke(self, worker: &dyn ServiceWorker) -> anyhow::Result<()> {
        match self {
            Operation::Start => worker.start().await,
            Operation::Stop => worker.stop().await,
            Operation::Kill => worker.kill().await,
            Operation::Wait => worker.wait().await,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds worker handles from service definitions.
///
/// The factory owns both halves of registration: deriving the unique service
/// name a definition is registered under, and constructing the worker that
/// will serve it with the runner's configuration.
///
/// # Example
///
/// ```ignore
/// struct HttpFactory;
///
/// impl ContainerFactory for HttpFactory {
///     type Definition = HttpService;
///
///     fn service_name(&self, definition: &HttpService) -> String {
///         definition.name.clone()
///     }
///
///     fn build(
///         &self,
///         definition: HttpService,
///         config: &RunnerConfig,
///     ) -> anyhow::Result<Arc<dyn ServiceWorker>> {
///         Ok(Arc::new(HttpContainer::new(definition, config)?))
///     }
/// }
/// ```
pub trait ContainerFactory: Send + Sync {
    /// The service definition type this factory understands.
    type Definition: Send;

    /// Name the definition will be registered under.
    fn service_name(&self, definition: &Self::Definition) -> String;

    /// Construct a worker for `definition`.
    fn build(
        &self,
        definition: Self::Definition,
        config: &RunnerConfig,
    ) -> anyhow::Result<Arc<dyn ServiceWorker>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        start: AtomicUsize,
        stop: AtomicUsize,
        kill: AtomicUsize,
        wait: AtomicUsize,
    }

    #[async_trait]
    impl ServiceWorker for Counting {
        async fn start(&self) -> anyhow::Result<()> {
            self.start.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stop.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn kill(&self) -> anyhow::Result<()> {
            self.kill.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("kill refused")
        }

        async fn wait(&self) -> anyhow::Result<()> {
            self.wait.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_invoke_routes_to_matching_method() {
        let worker = Counting::default();
        for op in Operation::ALL {
            let _ = op.invoke(&worker).await;
        }

        assert_eq!(worker.start.load(Ordering::SeqCst), 1);
        assert_eq!(worker.stop.load(Ordering::SeqCst), 1);
        assert_eq!(worker.kill.load(Ordering::SeqCst), 1);
        assert_eq!(worker.wait.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_returns_worker_error() {
        let worker = Counting::default();
        let err = Operation::Kill.invoke(&worker).await.unwrap_err();
        assert_eq!(err.to_string(), "kill refused");
    }

    #[test]
    fn test_operation_names() {
        let names: Vec<_> = Operation::ALL.iter().map(|op| op.to_string()).collect();
        assert_eq!(names, vec!["start", "stop", "kill", "wait"]);
        assert_eq!(
            serde_json::to_string(&Operation::Kill).unwrap(),
            "\"kill\""
        );
    }
}
