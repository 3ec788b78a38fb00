use async_trait::async_trait;
use convoy::{Operation, ServiceWorker, ShutdownToken};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scripted outcome of one operation on a [`MockWorker`].
#[derive(Clone, Debug, Default)]
pub struct Script {
    pub delay: Duration,
    pub error: Option<String>,
    pub until_stopped: bool,
}

impl Script {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Block until the worker is stopped or killed, then succeed.
    pub fn until_stopped() -> Self {
        Self {
            until_stopped: true,
            ..Self::default()
        }
    }

    pub fn after_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}

/// Ordered record of calls across several workers.
#[derive(Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
    epoch: Arc<Mutex<Option<Instant>>>,
}

#[derive(Clone, Debug)]
pub struct JournalEntry {
    pub service: String,
    pub operation: Operation,
    pub at: Duration,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, service: &str, operation: Operation) {
        let at = self.epoch.lock().get_or_insert_with(Instant::now).elapsed();
        self.entries.lock().push(JournalEntry {
            service: service.to_string(),
            operation,
            at,
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Services that received `operation`, in call order.
    pub fn services_for(&self, operation: Operation) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .map(|e| e.service.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A worker whose operations follow [`Script`]s and which records each call.
///
/// Unscripted operations succeed immediately. Clones share their call log.
#[derive(Clone)]
pub struct MockWorker {
    name: String,
    calls: Arc<Mutex<Vec<Operation>>>,
    scripts: Arc<Mutex<HashMap<Operation, Script>>>,
    journal: Option<CallJournal>,
    shutdown: ShutdownToken,
}

impl MockWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            scripts: Arc::new(Mutex::new(HashMap::new())),
            journal: None,
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn on(self, operation: Operation, script: Script) -> Self {
        self.scripts.lock().insert(operation, script);
        self
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Whether `stop` or `kill` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> Arc<dyn ServiceWorker> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls.lock().iter().filter(|op| **op == operation).count()
    }

    pub fn assert_called_once(&self, operation: Operation) {
        assert_eq!(
            self.call_count(operation),
            1,
            "Expected `{}` to receive {} exactly once, calls were {:?}",
            self.name,
            operation,
            self.calls()
        );
    }

    pub fn assert_never_called(&self) {
        assert!(
            self.calls.lock().is_empty(),
            "Expected `{}` to receive no calls, got {:?}",
            self.name,
            self.calls()
        );
    }

    pub fn set_script(&self, operation: Operation, script: Script) {
        self.scripts.lock().insert(operation, script);
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    async fn perform(&self, operation: Operation) -> anyhow::Result<()> {
        self.calls.lock().push(operation);
        if let Some(journal) = &self.journal {
            journal.record(&self.name, operation);
        }

        let script = self
            .scripts
            .lock()
            .get(&operation)
            .cloned()
            .unwrap_or_default();
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if script.until_stopped {
            self.shutdown.cancelled().await;
        }
        if matches!(operation, Operation::Stop | Operation::Kill) {
            self.shutdown.cancel();
        }
        match script.error {
            Some(error) => Err(anyhow::anyhow!(error)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceWorker for MockWorker {
    async fn start(&self) -> anyhow::Result<()> {
        self.perform(Operation::Start).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.perform(Operation::Stop).await
    }

    async fn kill(&self) -> anyhow::Result<()> {
        self.perform(Operation::Kill).await
    }

    async fn wait(&self) -> anyhow::Result<()> {
        self.perform(Operation::Wait).await
    }
}
