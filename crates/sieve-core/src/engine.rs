use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationSettings;
use crate::error::{Result, SieveError};
use crate::signature::PromptSignature;

/// Named input values for one prompt, e.g. `{"text": ..., "max_n": ...}`.
pub type FieldValues = serde_json::Map<String, serde_json::Value>;

/// Raw engine output for a single chunk. `None` when the chunk's inference produced nothing
/// usable (lenient engines only).
pub type ChunkResult = Option<serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Chat completion; the output schema is described in the prompt.
    Chat,
    /// Generation constrained to a JSON schema.
    Constrained,
    /// Declarative signatures with optional chain-of-thought.
    Reasoning,
    /// NLI-style zero-shot classifier.
    ZeroShot,
    /// Label and span tagger.
    Tagger,
}

impl EngineKind {
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Chat,
        EngineKind::Constrained,
        EngineKind::Reasoning,
        EngineKind::ZeroShot,
        EngineKind::Tagger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Constrained => "constrained",
            Self::Reasoning => "reasoning",
            Self::ZeroShot => "zero_shot",
            Self::Tagger => "tagger",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    Chat,
    Json,
    Predict,
    ChainOfThought,
    ZeroShotClassification,
    Classification,
    QuestionAnswering,
}

impl InferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Json => "json",
            Self::Predict => "predict",
            Self::ChainOfThought => "chain_of_thought",
            Self::ZeroShotClassification => "zero_shot_classification",
            Self::Classification => "classification",
            Self::QuestionAnswering => "question_answering",
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable snapshot of an engine. The wrapped backend is only recorded by name and has
/// to be supplied again when restoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineConfig {
    Chat {
        backend: String,
        #[serde(default)]
        settings: GenerationSettings,
    },
    Constrained {
        backend: String,
        #[serde(default)]
        settings: GenerationSettings,
    },
    Reasoning {
        backend: String,
        #[serde(default)]
        settings: GenerationSettings,
    },
    ZeroShot {
        backend: String,
        #[serde(default)]
        settings: GenerationSettings,
        #[serde(default)]
        multi_label: bool,
    },
    Tagger {
        backend: String,
        #[serde(default)]
        settings: GenerationSettings,
        threshold: f64,
    },
}

impl EngineConfig {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Chat { .. } => EngineKind::Chat,
            Self::Constrained { .. } => EngineKind::Constrained,
            Self::Reasoning { .. } => EngineKind::Reasoning,
            Self::ZeroShot { .. } => EngineKind::ZeroShot,
            Self::Tagger { .. } => EngineKind::Tagger,
        }
    }

    pub fn backend(&self) -> &str {
        match self {
            Self::Chat { backend, .. }
            | Self::Constrained { backend, .. }
            | Self::Reasoning { backend, .. }
            | Self::ZeroShot { backend, .. }
            | Self::Tagger { backend, .. } => backend,
        }
    }

    pub fn settings(&self) -> &GenerationSettings {
        match self {
            Self::Chat { settings, .. }
            | Self::Constrained { settings, .. }
            | Self::Reasoning { settings, .. }
            | Self::ZeroShot { settings, .. }
            | Self::Tagger { settings, .. } => settings,
        }
    }

    pub fn settings_mut(&mut self) -> &mut GenerationSettings {
        match self {
            Self::Chat { settings, .. }
            | Self::Constrained { settings, .. }
            | Self::Reasoning { settings, .. }
            | Self::ZeroShot { settings, .. }
            | Self::Tagger { settings, .. } => settings,
        }
    }
}

/// Chunk-level callable produced by [`Engine::build_executable`].
///
/// The returned sequence has exactly one entry per input, in input order.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, inputs: Vec<FieldValues>) -> Result<Vec<ChunkResult>>;
}

/// Uniform wrapper around one inference backend.
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn inference_modes(&self) -> &[InferenceMode];

    fn supports_few_shotting(&self) -> bool;

    /// Builds the chunk-level callable for `mode`. Fails with
    /// [`SieveError::UnsupportedMode`] if the engine does not declare `mode`.
    fn build_executable(
        &self,
        mode: InferenceMode,
        prompt_template: Option<&str>,
        prompt_signature: &PromptSignature,
        fewshot_examples: &[FieldValues],
    ) -> Result<Box<dyn Executable>>;

    fn config(&self) -> EngineConfig;

    fn supports(&self, mode: InferenceMode) -> bool {
        self.inference_modes().contains(&mode)
    }

    fn ensure_mode(&self, mode: InferenceMode) -> Result<()> {
        if self.supports(mode) {
            Ok(())
        } else {
            Err(SieveError::UnsupportedMode {
                engine: self.kind(),
                mode,
            })
        }
    }
}

/// Rebuilds live engines from snapshots, injecting the backends snapshots only name.
pub trait EngineResolver {
    fn resolve(&self, config: &EngineConfig) -> Result<Arc<dyn Engine>>;
}
