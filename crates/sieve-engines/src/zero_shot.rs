use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use sieve_core::config::GenerationSettings;
use sieve_core::engine::{
    ChunkResult, Engine, EngineConfig, EngineKind, Executable, FieldValues, InferenceMode,
};
use sieve_core::error::{Result, SieveError};
use sieve_core::signature::PromptSignature;

use crate::backend::{ZeroShotBackend, ZeroShotPrediction};
use crate::batch::{ensure_len, input_text, lenient};

const MODES: &[InferenceMode] = &[InferenceMode::ZeroShotClassification];

pub const DEFAULT_HYPOTHESIS: &str = "This text is about {}.";

/// NLI-style zero-shot classifier engine. The prompt template, if any, is the hypothesis
/// template with `{}` standing for the candidate label.
pub struct ZeroShotEngine {
    backend: Arc<dyn ZeroShotBackend>,
    settings: GenerationSettings,
    multi_label: bool,
}

impl ZeroShotEngine {
    pub fn new(backend: Arc<dyn ZeroShotBackend>) -> Self {
        Self {
            backend,
            settings: GenerationSettings::default(),
            multi_label: false,
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Score labels independently instead of as a distribution summing to one.
    pub fn with_multi_label(mut self, multi_label: bool) -> Self {
        self.multi_label = multi_label;
        self
    }
}

impl Engine for ZeroShotEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::ZeroShot
    }

    fn inference_modes(&self) -> &[InferenceMode] {
        MODES
    }

    fn supports_few_shotting(&self) -> bool {
        false
    }

    fn build_executable(
        &self,
        mode: InferenceMode,
        prompt_template: Option<&str>,
        prompt_signature: &PromptSignature,
        fewshot_examples: &[FieldValues],
    ) -> Result<Box<dyn Executable>> {
        self.ensure_mode(mode)?;
        if !fewshot_examples.is_empty() {
            warn!(
                count = fewshot_examples.len(),
                "Zero-shot engine cannot use few-shot examples; ignoring them"
            );
        }

        Ok(Box::new(ZeroShotExecutable {
            backend: Arc::clone(&self.backend),
            labels: prompt_signature.as_labels()?.to_vec(),
            hypothesis: prompt_template.unwrap_or(DEFAULT_HYPOTHESIS).to_string(),
            multi_label: self.multi_label,
            settings: self.settings.clone(),
        }))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::ZeroShot {
            backend: self.backend.name().to_string(),
            settings: self.settings.clone(),
            multi_label: self.multi_label,
        }
    }
}

struct ZeroShotExecutable {
    backend: Arc<dyn ZeroShotBackend>,
    labels: Vec<String>,
    hypothesis: String,
    multi_label: bool,
    settings: GenerationSettings,
}

impl ZeroShotExecutable {
    fn to_result(&self, prediction: ZeroShotPrediction) -> Result<ChunkResult> {
        let checked = if prediction.labels.len() == prediction.scores.len() {
            serde_json::to_value(prediction).map_err(SieveError::from)
        } else {
            Err(SieveError::ContractViolation(format!(
                "backend {} returned {} labels but {} scores",
                self.backend.name(),
                prediction.labels.len(),
                prediction.scores.len()
            )))
        };
        lenient(checked, self.settings.strict, EngineKind::ZeroShot)
    }
}

#[async_trait]
impl Executable for ZeroShotExecutable {
    #[instrument(skip_all, fields(inputs = inputs.len(), labels = self.labels.len()))]
    async fn execute(&self, inputs: Vec<FieldValues>) -> Result<Vec<ChunkResult>> {
        let texts = inputs.iter().map(input_text).collect::<Result<Vec<_>>>()?;
        let window = self.settings.effective_batch_size(texts.len());
        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(window) {
            let predictions = self
                .backend
                .classify(batch, &self.labels, &self.hypothesis, self.multi_label)
                .await?;
            ensure_len(&predictions, batch.len(), self.backend.name())?;
            for prediction in predictions {
                results.push(self.to_result(prediction)?);
            }
            debug!(batch = batch.len(), done = results.len(), "Zero-shot batch classified");
        }

        Ok(results)
    }
}
