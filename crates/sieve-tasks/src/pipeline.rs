use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use sieve_core::document::Document;
use sieve_core::error::{Result, SieveError};

use crate::dataset::Dataset;
use crate::serialization::TaskConfig;
use crate::task::PredictiveTask;

/// A step of a pipeline. Mutates documents in place.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, docs: &mut [Document]) -> Result<()>;

    fn config(&self) -> TaskConfig;

    fn to_dataset(&self, docs: &[Document]) -> Result<Dataset>;
}

#[async_trait]
impl Task for PredictiveTask {
    fn id(&self) -> &str {
        PredictiveTask::id(self)
    }

    async fn run(&self, docs: &mut [Document]) -> Result<()> {
        PredictiveTask::run(self, docs).await
    }

    fn config(&self) -> TaskConfig {
        TaskConfig::from_task(self)
    }

    fn to_dataset(&self, docs: &[Document]) -> Result<Dataset> {
        PredictiveTask::to_dataset(self, docs)
    }
}

/// Fixed, linear sequence of tasks over one document batch. Later tasks see the results of
/// earlier ones.
pub struct Pipeline {
    tasks: Vec<Box<dyn Task>>,
}

impl Pipeline {
    pub fn new(tasks: Vec<Box<dyn Task>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id()) {
                return Err(SieveError::DuplicateTaskId(task.id().to_string()));
            }
        }
        Ok(Self { tasks })
    }

    /// Appends `task`, rejecting a duplicate id.
    pub fn then(mut self, task: impl Task + 'static) -> Result<Self> {
        if self.task(task.id()).is_some() {
            return Err(SieveError::DuplicateTaskId(task.id().to_string()));
        }
        self.tasks.push(Box::new(task));
        Ok(self)
    }

    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&dyn Task> {
        self.tasks.iter().find(|t| t.id() == id).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[instrument(skip_all, fields(docs = docs.len(), tasks = self.tasks.len()))]
    pub async fn run(&self, docs: &mut [Document]) -> Result<()> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Pipeline run started");

        for (position, task) in self.tasks.iter().enumerate() {
            info!(%run_id, task_id = task.id(), position, "Running task");
            task.run(docs).await?;
        }

        info!(%run_id, "Pipeline run completed");
        Ok(())
    }
}
