use thiserror::Error;

use crate::worker::Operation;

/// One worker's lifecycle call failed.
///
/// Carries the name the worker was registered under and the operation that
/// failed, with the worker's own error as the source. Panics inside a worker
/// task are reported the same way.
#[derive(Debug, Error)]
#[error("service `{service}` failed to {operation}: {source}")]
pub struct WorkerFailure {
    /// Registered name of the failing worker.
    pub service: String,
    /// The operation that failed.
    pub operation: Operation,
    /// The underlying error raised by the worker.
    #[source]
    pub source: anyhow::Error,
}

impl WorkerFailure {
    /// Create a failure record for `service`.
    pub fn new(
        service: impl Into<String>,
        operation: Operation,
        source: anyhow::Error,
    ) -> Self {
        Self {
            service: service.into(),
            operation,
            source,
        }
    }
}

/// Every failure collected by one run-to-completion fan-out.
///
/// Returned by `start`, `stop` and `kill` after every worker has been
/// attempted. The list is never empty.
#[derive(Debug, Error)]
#[error("{} of {attempted} services failed to {operation}: {}", .failures.len(), describe(.failures))]
pub struct AggregateFailure {
    /// The operation that was fanned out.
    pub operation: Operation,
    /// How many workers received the call.
    pub attempted: usize,
    /// One entry per worker whose call failed.
    pub failures: Vec<WorkerFailure>,
}

impl AggregateFailure {
    /// Names of the failing services, in the order the failures were recorded.
    pub fn failed_services(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.service.as_str()).collect()
    }

    /// Failure recorded for `service`, if any.
    pub fn failure_for(&self, service: &str) -> Option<&WorkerFailure> {
        self.failures.iter().find(|f| f.service == service)
    }

    /// Number of failed workers.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false for failures produced by the executor.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn describe(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.service, f.source))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Misuse of the runner API by its caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    /// A worker was registered after `start` had been called.
    #[error("cannot add service `{service}` after the runner has started")]
    AddAfterStart {
        /// Name the caller tried to register.
        service: String,
    },
    /// A worker was registered under an empty name.
    #[error("service name must not be empty")]
    EmptyServiceName,
}

/// Failure to build or register a service from a definition.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The container factory could not build a worker.
    #[error("failed to build service `{service}`: {source}")]
    Build {
        /// Name of the service being built.
        service: String,
        /// Factory error.
        #[source]
        source: anyhow::Error,
    },
    /// The runner refused the registration.
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Failure of a scoped session from [`run_services`](crate::session::run_services).
#[derive(Debug, Error)]
pub enum SessionError {
    /// A service definition could not be registered. Nothing was started.
    #[error(transparent)]
    Register(#[from] RegistrationError),
    /// One or more services failed to start. The session was torn down.
    #[error("services failed to start: {0}")]
    Start(#[source] AggregateFailure),
    /// The caller's block returned an error. The session was torn down.
    #[error("session body failed: {0}")]
    Body(#[source] anyhow::Error),
    /// The caller's block succeeded but teardown failed.
    #[error("session teardown failed: {0}")]
    Teardown(#[source] AggregateFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn failure(service: &str, message: &str) -> WorkerFailure {
        WorkerFailure::new(service, Operation::Stop, anyhow::anyhow!(message.to_string()))
    }

    #[test]
    fn test_worker_failure_display_and_source() {
        let err = failure("billing", "socket closed");
        assert_eq!(
            err.to_string(),
            "service `billing` failed to stop: socket closed"
        );
        assert_eq!(err.source().unwrap().to_string(), "socket closed");
    }

    #[test]
    fn test_aggregate_failure_lists_every_service() {
        let err = AggregateFailure {
            operation: Operation::Stop,
            attempted: 3,
            failures: vec![failure("a", "boom"), failure("c", "bang")],
        };

        assert_eq!(err.len(), 2);
        assert!(!err.is_empty());
        assert_eq!(err.failed_services(), vec!["a", "c"]);
        assert!(err.failure_for("b").is_none());
        assert_eq!(
            err.failure_for("c").unwrap().source.to_string(),
            "bang"
        );
        assert_eq!(
            err.to_string(),
            "2 of 3 services failed to stop: a (boom), c (bang)"
        );
    }

    #[test]
    fn test_contract_violation_display() {
        let err = ContractViolation::AddAfterStart {
            service: "late".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot add service `late` after the runner has started"
        );
    }
}
