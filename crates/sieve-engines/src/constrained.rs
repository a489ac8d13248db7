use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use sieve_core::config::GenerationSettings;
use sieve_core::engine::{
    ChunkResult, Engine, EngineConfig, EngineKind, Executable, FieldValues, InferenceMode,
};
use sieve_core::error::{Result, SieveError};
use sieve_core::signature::{OutputSchema, PromptSignature};
use sieve_core::template::Template;

use crate::backend::ConstrainedBackend;
use crate::batch::{lenient, run_ordered};

const MODES: &[InferenceMode] = &[InferenceMode::Json];

/// Engine over a backend that can be forced to emit JSON matching a schema.
pub struct ConstrainedEngine {
    backend: Arc<dyn ConstrainedBackend>,
    settings: GenerationSettings,
}

impl ConstrainedEngine {
    pub fn new(backend: Arc<dyn ConstrainedBackend>) -> Self {
        Self {
            backend,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl Engine for ConstrainedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Constrained
    }

    fn inference_modes(&self) -> &[InferenceMode] {
        MODES
    }

    fn supports_few_shotting(&self) -> bool {
        true
    }

    fn build_executable(
        &self,
        mode: InferenceMode,
        prompt_template: Option<&str>,
        prompt_signature: &PromptSignature,
        fewshot_examples: &[FieldValues],
    ) -> Result<Box<dyn Executable>> {
        self.ensure_mode(mode)?;
        let template = prompt_template.ok_or_else(|| {
            SieveError::Config("constrained engine requires a prompt template".to_string())
        })?;

        Ok(Box::new(ConstrainedExecutable {
            inner: Arc::new(ConstrainedCall {
                backend: Arc::clone(&self.backend),
                template: Template::parse(template)?,
                schema: prompt_signature.as_schema()?.clone(),
                examples: fewshot_examples.to_vec(),
                strict: self.settings.strict,
            }),
            settings: self.settings.clone(),
        }))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::Constrained {
            backend: self.backend.name().to_string(),
            settings: self.settings.clone(),
        }
    }
}

struct ConstrainedCall {
    backend: Arc<dyn ConstrainedBackend>,
    template: Template,
    schema: OutputSchema,
    examples: Vec<FieldValues>,
    strict: bool,
}

impl ConstrainedCall {
    async fn run_one(&self, input: FieldValues) -> Result<ChunkResult> {
        let prompt = self.template.render_with_examples(&input, &self.examples);
        let value = self.backend.generate(&prompt, &self.schema).await?;
        // Constrained decoding can still truncate or drop fields.
        let checked = self.schema.validate(&value).map(|()| value);
        lenient(checked, self.strict, EngineKind::Constrained)
    }
}

struct ConstrainedExecutable {
    inner: Arc<ConstrainedCall>,
    settings: GenerationSettings,
}

#[async_trait]
impl Executable for ConstrainedExecutable {
    #[instrument(skip_all, fields(inputs = inputs.len(), schema = %self.inner.schema.name))]
    async fn execute(&self, inputs: Vec<FieldValues>) -> Result<Vec<ChunkResult>> {
        let limit = self.settings.effective_batch_size(inputs.len());
        let inner = Arc::clone(&self.inner);
        run_ordered(inputs, limit, move |input| {
            let inner = Arc::clone(&inner);
            async move { inner.run_one(input).await }
        })
        .await
    }
}
