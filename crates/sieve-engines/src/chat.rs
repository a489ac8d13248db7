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

use crate::backend::{ChatBackend, ChatRequest};
use crate::batch::{lenient, run_ordered};

const MODES: &[InferenceMode] = &[InferenceMode::Chat];

/// Chat-completion engine. The output schema travels in the system prompt and the reply is
/// parsed as JSON.
pub struct ChatEngine {
    backend: Arc<dyn ChatBackend>,
    settings: GenerationSettings,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
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

pub(crate) fn schema_system_prompt(schema: &OutputSchema) -> String {
    format!(
        "You produce structured data. Respond ONLY with a single JSON object that conforms to \
         this JSON schema. Do not add explanations or markdown.\n\n{}",
        schema.to_json_schema()
    )
}

impl Engine for ChatEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Chat
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
            SieveError::Config("chat engine requires a prompt template".to_string())
        })?;
        let schema = prompt_signature.as_schema()?.clone();

        Ok(Box::new(ChatExecutable {
            inner: Arc::new(ChatCall {
                backend: Arc::clone(&self.backend),
                system: schema_system_prompt(&schema),
                template: Template::parse(template)?,
                schema,
                examples: fewshot_examples.to_vec(),
                strict: self.settings.strict,
            }),
            settings: self.settings.clone(),
        }))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::Chat {
            backend: self.backend.name().to_string(),
            settings: self.settings.clone(),
        }
    }
}

struct ChatCall {
    backend: Arc<dyn ChatBackend>,
    system: String,
    template: Template,
    schema: OutputSchema,
    examples: Vec<FieldValues>,
    strict: bool,
}

impl ChatCall {
    async fn run_one(&self, input: FieldValues) -> Result<ChunkResult> {
        let request = ChatRequest {
            system: Some(self.system.clone()),
            prompt: self.template.render_with_examples(&input, &self.examples),
        };
        let raw = self.backend.complete(&request).await?;
        lenient(self.schema.parse_output(&raw), self.strict, EngineKind::Chat)
    }
}

struct ChatExecutable {
    inner: Arc<ChatCall>,
    settings: GenerationSettings,
}

#[async_trait]
impl Executable for ChatExecutable {
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
