//! Pipeline snapshots. Engines are recorded by configuration only; their backends are
//! supplied again through an [`EngineResolver`] when a snapshot is restored.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sieve_core::config::SettingsOverride;
use sieve_core::engine::{EngineConfig, EngineResolver, FieldValues};
use sieve_core::error::Result;

use crate::pipeline::{Pipeline, Task};
use crate::task::{PredictiveTask, TaskSpec};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    pub task: TaskSpec,
    /// Custom template only; `None` means the bridge default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_signature_description: Option<String>,
    #[serde(default)]
    pub include_meta: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fewshot_examples: Vec<FieldValues>,
    pub engine: EngineConfig,
}

impl TaskConfig {
    pub fn from_task(task: &PredictiveTask) -> Self {
        Self {
            task_id: task.id().to_string(),
            task: task.spec().clone(),
            prompt_template: task.custom_prompt_template().map(str::to_string),
            prompt_signature_description: task
                .custom_prompt_signature_description()
                .map(str::to_string),
            include_meta: task.include_meta(),
            fewshot_examples: task.fewshot_examples().to_vec(),
            engine: task.engine().config(),
        }
    }

    /// Rebuilds the task, resolving its engine through `resolver`.
    pub fn restore(&self, resolver: &dyn EngineResolver) -> Result<PredictiveTask> {
        let engine = resolver.resolve(&self.engine)?;
        let mut builder = PredictiveTask::builder(self.task.clone(), engine)
            .task_id(self.task_id.clone())
            .include_meta(self.include_meta)
            .fewshot_values(self.fewshot_examples.clone());
        if let Some(template) = &self.prompt_template {
            builder = builder.prompt_template(template.clone());
        }
        if let Some(description) = &self.prompt_signature_description {
            builder = builder.prompt_signature_description(description.clone());
        }
        builder.build()
    }
}

impl PipelineConfig {
    pub fn new(tasks: Vec<TaskConfig>) -> Self {
        Self {
            version: VERSION.to_string(),
            created_at: Utc::now(),
            tasks,
        }
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies `overrides` to the engine settings of every task.
    pub fn apply_overrides(&mut self, overrides: &SettingsOverride) {
        if overrides.is_empty() {
            return;
        }
        for task in &mut self.tasks {
            overrides.apply(task.engine.settings_mut());
            debug!(task_id = %task.task_id, settings = ?task.engine.settings(), "Engine settings overridden");
        }
    }
}

impl Pipeline {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig::new(self.tasks().iter().map(|t| t.config()).collect())
    }

    /// Restores a pipeline. Fails with the same configuration errors as building the tasks
    /// directly, or if the resolver lacks a backend.
    pub fn from_config(config: &PipelineConfig, resolver: &dyn EngineResolver) -> Result<Self> {
        if config.version != VERSION {
            warn!(
                snapshot = %config.version,
                current = VERSION,
                "Pipeline snapshot was written by a different version"
            );
        }

        let tasks = config
            .tasks
            .iter()
            .map(|task| task.restore(resolver).map(|t| Box::new(t) as Box<dyn Task>))
            .collect::<Result<Vec<_>>>()?;

        debug!(tasks = tasks.len(), created_at = %config.created_at, "Restored pipeline");
        Pipeline::new(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sieve_core::config::GenerationSettings;

    #[test]
    fn test_task_config_json_shape() {
        let config = TaskConfig {
            task_id: "topic".to_string(),
            task: TaskSpec::Classification {
                labels: vec!["science".to_string()],
            },
            prompt_template: None,
            prompt_signature_description: Some("Topics.".to_string()),
            include_meta: true,
            fewshot_examples: Vec::new(),
            engine: EngineConfig::Constrained {
                backend: "anthropic:test".to_string(),
                settings: GenerationSettings::default(),
            },
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["task"], json!({"kind": "classification", "labels": ["science"]}));
        assert_eq!(value["engine"]["kind"], "constrained");
        assert!(value.get("prompt_template").is_none());
        assert!(value.get("fewshot_examples").is_none());

        let back: TaskConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_apply_overrides_reaches_every_engine() {
        let task = |id: &str, strict: bool| TaskConfig {
            task_id: id.to_string(),
            task: TaskSpec::Summarization { max_n: 5 },
            prompt_template: None,
            prompt_signature_description: None,
            include_meta: false,
            fewshot_examples: Vec::new(),
            engine: EngineConfig::Chat {
                backend: "anthropic:test".to_string(),
                settings: GenerationSettings {
                    batch_size: Some(4),
                    strict,
                },
            },
        };
        let mut config = PipelineConfig::new(vec![task("a", false), task("b", true)]);

        config.apply_overrides(&SettingsOverride::default());
        assert!(!config.tasks[0].engine.settings().strict);

        config.apply_overrides(&SettingsOverride {
            batch_size: None,
            strict: Some(true),
        });
        for task in &config.tasks {
            assert_eq!(
                task.engine.settings(),
                &GenerationSettings {
                    batch_size: Some(4),
                    strict: true
                }
            );
        }
    }

    #[test]
    fn test_pipeline_config_records_version() {
        let config = PipelineConfig::new(Vec::new());
        assert_eq!(config.version, VERSION);

        let json = config.to_json().unwrap();
        let back = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(back.created_at, config.created_at);
    }
}
