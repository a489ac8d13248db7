//! Declarative-signature engine with optional chain-of-thought.
//!
//! The engine composes its own prompt from the signature: instructions, a description of
//! every input and output field, rendered demonstrations, then the current input. A custom
//! prompt template is not used.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{instrument, warn};

use sieve_core::config::GenerationSettings;
use sieve_core::engine::{
    ChunkResult, Engine, EngineConfig, EngineKind, Executable, FieldValues, InferenceMode,
};
use sieve_core::error::Result;
use sieve_core::signature::{DeclarativeSignature, FieldSpec, OutputSchema, PromptSignature};

use crate::backend::{ChatBackend, ChatRequest};
use crate::batch::{lenient, run_ordered};

const MODES: &[InferenceMode] = &[InferenceMode::Predict, InferenceMode::ChainOfThought];

const SYSTEM_PROMPT: &str = "You complete structured tasks. Follow the instructions exactly \
and respond with a single JSON object containing the requested output fields.";

pub struct ReasoningEngine {
    backend: Arc<dyn ChatBackend>,
    settings: GenerationSettings,
}

impl ReasoningEngine {
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

impl Engine for ReasoningEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Reasoning
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
        if prompt_template.is_some() {
            warn!("Reasoning engine builds its own prompts; ignoring custom prompt template");
        }

        let signature = prompt_signature.as_declarative()?.clone();
        let schema = signature.output_schema(mode == InferenceMode::ChainOfThought);
        let preamble = preamble(&signature, &schema, fewshot_examples);

        Ok(Box::new(ReasoningExecutable {
            inner: Arc::new(ReasoningCall {
                backend: Arc::clone(&self.backend),
                signature,
                schema,
                preamble,
                strict: self.settings.strict,
            }),
            settings: self.settings.clone(),
        }))
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::Reasoning {
            backend: self.backend.name().to_string(),
            settings: self.settings.clone(),
        }
    }
}

fn describe_fields(out: &mut String, heading: &str, fields: &[FieldSpec]) {
    let _ = writeln!(out, "{heading}:");
    for field in fields {
        match &field.description {
            Some(desc) => {
                let _ = writeln!(out, "- {}: {desc}", field.name);
            }
            None => {
                let _ = writeln!(out, "- {}", field.name);
            }
        }
    }
    out.push('\n');
}

fn field_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_values<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>, values: &FieldValues) {
    for name in fields {
        if let Some(value) = values.get(name) {
            let _ = writeln!(out, "{name}: {}", field_value(value));
        }
    }
}

/// Everything in the prompt that does not depend on the current input.
fn preamble(
    signature: &DeclarativeSignature,
    schema: &OutputSchema,
    examples: &[FieldValues],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}\n", signature.instructions.trim());
    describe_fields(&mut out, "Input fields", &signature.inputs);
    describe_fields(&mut out, "Output fields", &schema.fields);

    for (i, example) in examples.iter().enumerate() {
        let _ = writeln!(out, "Example {}:", i + 1);
        write_values(&mut out, signature.inputs.iter().map(|f| f.name.as_str()), example);
        write_values(&mut out, schema.field_names(), example);
        out.push('\n');
    }
    out
}

struct ReasoningCall {
    backend: Arc<dyn ChatBackend>,
    signature: DeclarativeSignature,
    schema: OutputSchema,
    preamble: String,
    strict: bool,
}

impl ReasoningCall {
    fn prompt(&self, input: &FieldValues) -> String {
        let mut prompt = self.preamble.clone();
        prompt.push_str("Input:\n");
        write_values(
            &mut prompt,
            self.signature.inputs.iter().map(|f| f.name.as_str()),
            input,
        );
        let keys: Vec<&str> = self.schema.field_names().collect();
        let _ = write!(
            prompt,
            "\nRespond with a JSON object with exactly these keys, in order: {}.",
            keys.join(", ")
        );
        prompt
    }

    async fn run_one(&self, input: FieldValues) -> Result<ChunkResult> {
        let request = ChatRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            prompt: self.prompt(&input),
        };
        let raw = self.backend.complete(&request).await?;
        lenient(self.schema.parse_output(&raw), self.strict, EngineKind::Reasoning)
    }
}

struct ReasoningExecutable {
    inner: Arc<ReasoningCall>,
    settings: GenerationSettings,
}

#[async_trait]
impl Executable for ReasoningExecutable {
    #[instrument(skip_all, fields(inputs = inputs.len(), signature = %self.inner.signature.name))]
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
