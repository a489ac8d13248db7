use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use sieve_core::config::GenerationSettings;
use sieve_core::engine::{
    ChunkResult, Engine, EngineConfig, EngineKind, Executable, FieldValues, InferenceMode,
};
use sieve_core::error::Result;
use sieve_core::signature::PromptSignature;

use crate::backend::TaggerBackend;
use crate::batch::{ensure_len, input_text};

const MODES: &[InferenceMode] = &[
    InferenceMode::Classification,
    InferenceMode::QuestionAnswering,
];

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Label and span tagger engine. Labels (or questions) come from a label signature; matches
/// scoring below the threshold are dropped by the backend.
pub struct TaggerEngine {
    backend: Arc<dyn TaggerBackend>,
    settings: GenerationSettings,
    threshold: f64,
}

impl TaggerEngine {
    pub fn new(backend: Arc<dyn TaggerBackend>) -> Self {
        Self {
            backend,
            settings: GenerationSettings::default(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }
}

impl Engine for TaggerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tagger
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
        if prompt_template.is_some() {
            warn!("Tagger engine does not use prompt templates; ignoring it");
        }
        if !fewshot_examples.is_empty() {
            warn!(
                count = fewshot_examples.len(),
                "Tagger engine cannot use few-shot examples; ignoring them"
            );
        }

        Ok(Box::new(TaggerExecutable {
            backend: Arc::clone(&self.backend),
            mode,
            labels: prompt_signature.as_labels()?.to_vec(),
            threshold: self.threshold,
            settings: self.settings.clone(),
        }))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::Tagger {
            backend: self.backend.name().to_string(),
            settings: self.settings.clone(),
            threshold: self.threshold,
        }
    }
}

struct TaggerExecutable {
    backend: Arc<dyn TaggerBackend>,
    mode: InferenceMode,
    /// Labels for classification, questions for question answering.
    labels: Vec<String>,
    threshold: f64,
    settings: GenerationSettings,
}

impl TaggerExecutable {
    async fn run_batch(&self, batch: &[String]) -> Result<Vec<serde_json::Value>> {
        let name = self.backend.name();
        let values = if self.mode == InferenceMode::QuestionAnswering {
            let spans = self.backend.answer(batch, &self.labels, self.threshold).await?;
            ensure_len(&spans, batch.len(), name)?;
            spans
                .into_iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?
        } else {
            let scores = self
                .backend
                .classify(batch, &self.labels, self.threshold)
                .await?;
            ensure_len(&scores, batch.len(), name)?;
            scores
                .into_iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?
        };
        Ok(values)
    }
}

#[async_trait]
impl Executable for TaggerExecutable {
    #[instrument(skip_all, fields(inputs = inputs.len(), mode = %self.mode))]
    async fn execute(&self, inputs: Vec<FieldValues>) -> Result<Vec<ChunkResult>> {
        let texts = inputs.iter().map(input_text).collect::<Result<Vec<_>>>()?;
        let window = self.settings.effective_batch_size(texts.len());
        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(window) {
            results.extend(self.run_batch(batch).await?.into_iter().map(Some));
            debug!(batch = batch.len(), done = results.len(), "Tagger batch processed");
        }

        Ok(results)
    }
}
