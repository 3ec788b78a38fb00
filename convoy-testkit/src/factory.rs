use convoy::{ContainerFactory, Operation, RunnerConfig, ServiceWorker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{CallJournal, MockWorker, Script};

/// Definition of a mock service: its name and per-operation scripts.
#[derive(Clone, Debug)]
pub struct MockDefinition {
    pub name: String,
    pub scripts: Vec<(Operation, Script)>,
    pub build_error: Option<String>,
}

impl MockDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scripts: Vec::new(),
            build_error: None,
        }
    }

    pub fn on(mut self, operation: Operation, script: Script) -> Self {
        self.scripts.push((operation, script));
        self
    }

    /// Make the factory refuse to build this definition.
    pub fn unbuildable(mut self, error: impl Into<String>) -> Self {
        self.build_error = Some(error.into());
        self
    }
}

/// Factory building [`MockWorker`]s, keeping every worker it built.
#[derive(Clone, Default)]
pub struct MockFactory {
    built: Arc<Mutex<HashMap<String, Vec<MockWorker>>>>,
    configs: Arc<Mutex<Vec<RunnerConfig>>>,
    journal: Option<CallJournal>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// The most recent worker built under `name`.
    pub fn worker(&self, name: &str) -> Option<MockWorker> {
        self.built
            .lock()
            .get(name)
            .and_then(|workers| workers.last().cloned())
    }

    /// Every worker built under `name`, oldest first.
    pub fn workers(&self, name: &str) -> Vec<MockWorker> {
        self.built.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn build_count(&self) -> usize {
        self.built.lock().values().map(Vec::len).sum()
    }

    /// Configurations the factory was handed, one per build.
    pub fn configs(&self) -> Vec<RunnerConfig> {
        self.configs.lock().clone()
    }
}

impl ContainerFactory for MockFactory {
    type Definition = MockDefinition;

    fn service_name(&self, definition: &MockDefinition) -> String {
        definition.name.clone()
    }

    fn build(
        &self,
        definition: MockDefinition,
        config: &RunnerConfig,
    ) -> anyhow::Result<Arc<dyn ServiceWorker>> {
        if let Some(error) = definition.build_error {
            anyhow::bail!(error);
        }

        let mut worker = MockWorker::new(definition.name.clone());
        for (operation, script) in definition.scripts {
            worker = worker.on(operation, script);
        }
        if let Some(journal) = &self.journal {
            worker = worker.with_journal(journal.clone());
        }

        self.configs.lock().push(config.clone());
        self.built
            .lock()
            .entry(definition.name)
            .or_default()
            .push(worker.clone());
        Ok(worker.handle())
    }
}
