//! Convoy - concurrent lifecycle coordination for a set of service workers.
//!
//! Convoy serves a fixed, explicitly registered set of independently failable
//! long-running workers as one logical unit: start them all, stop or kill them
//! all, and wait for them all to finish.
//!
//! # Core Concepts
//!
//! - **Worker**: anything implementing [`ServiceWorker`]. What `start`,
//!   `stop`, `kill` and `wait` do inside one service is up to the worker.
//!
//! - **Fan-out**: [`FanOut`] invokes one [`Operation`] on every worker
//!   concurrently, either aggregating every failure ([`Policy::Aggregate`])
//!   or returning at the first one ([`Policy::FailFast`]).
//!
//! - **Runner**: [`ServiceRunner`] owns the named registry of workers and
//!   drives their lifecycle. When waiting reveals a failed worker, the
//!   runner stops its peers before reporting the failure.
//!
//! - **Session**: [`run_services`] starts a runner for the duration of an
//!   async block and always tears it down afterwards.
//!
//! - **Events**: runners report lifecycle transitions and failures to an
//!   injected [`LifecycleObserver`], such as [`TracingObserver`] or the
//!   broadcast-based [`LifecycleEventBus`].
//!
//! # Example
//!
//! ```ignore
//! use convoy::*;
//!
//! let mut runner = ServiceRunner::new(RunnerConfig::new("edge"));
//! runner.add("billing", Arc::new(BillingService::new()))?;
//! runner.add("search", Arc::new(SearchService::new()))?;
//!
//! runner.start().await?;
//! runner.wait().await?;
//! ```

/// Runner and session configuration.
///
/// [`RunnerConfig`] carries the runner label and opaque settings handed to
/// container factories; [`SessionOptions`] tunes scoped sessions.
pub mod config;

/// Error taxonomy.
///
/// - [`WorkerFailure`] - one worker's call failed
/// - [`AggregateFailure`] - every failure from one run-to-completion fan-out
/// - [`ContractViolation`] - misuse of the runner API
/// - [`RegistrationError`] and [`SessionError`] - registration and session failures
pub mod error;

/// Lifecycle events and observers.
pub mod events;

/// Concurrent fan-out of one operation over many workers.
pub mod fanout;

/// The lifecycle runner and its builder.
pub mod runner;

/// Scoped sessions with guaranteed teardown.
///
/// A session builds a [`ServiceRunner`] from a batch of service definitions,
/// starts it, hands it to a caller-supplied block and tears it down when the
/// block finishes. Teardown runs on normal return, on an error from the block
/// and on a panic inside the block, which resumes after teardown.
pub mod session;

/// Shutdown signalling for worker implementations.
pub mod shutdown;

/// Tracing spans for runner and worker operations.
pub mod telemetry;

/// The worker capability contract.
///
/// - [`ServiceWorker`] - the four lifecycle operations
/// - [`Operation`] - explicit dispatch over those operations
/// - [`ContainerFactory`] - builds workers from service definitions
pub mod worker;

pub use config::*;
pub use error::*;
pub use events::*;
pub use fanout::{FanOut, FanOutError, Policy, Target};
pub use runner::{RunnerState, ServiceRunner, ServiceRunnerBuilder};
pub use session::{run_services, ServiceSession};
pub use shutdown::ShutdownToken;
pub use worker::*;
