use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sieve_core::document::Document;
use sieve_core::engine::{ChunkResult, EngineKind, FieldValues, InferenceMode};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::TaskOutput;
use sieve_core::signature::{DeclarativeSignature, FieldKind, FieldSpec, OutputSchema, PromptSignature};

use crate::bridge::{
    boxed, join_chunk_texts, text_fields, Bridge, BridgeBase, BridgeContext, BridgeRegistry,
};
use crate::dataset::{task_results, text_value, unexpected_output, Dataset};
use crate::task::{typed_examples, TaskKind, TaskSpec};

const SCHEMA_TEMPLATE: &str = "\
Translate the given text into {{ to }}. Keep the meaning, tone and formatting of the original.

{% if examples %}
Examples:
----------
{% for example in examples %}
Text: \"{{ example.text }}\"
Target language: {{ example.to }}
Translation: \"{{ example.translation }}\"
{% endfor %}
----------
{% endif %}
========
Text: {{ text }}
Target language: {{ to }}
Translation:
";

const REASONING_DESCRIPTION: &str = "Translate this text into the target language.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub to: String,
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

pub struct TranslationBridge {
    base: BridgeBase,
    to: String,
    signature: PromptSignature,
}

impl TranslationBridge {
    fn target(ctx: &BridgeContext<'_>) -> Result<String> {
        match ctx.spec {
            TaskSpec::Translation { to } if to.trim().is_empty() => Err(SieveError::Config(
                "translation target language must not be empty".to_string(),
            )),
            TaskSpec::Translation { to } => Ok(to.clone()),
            _ => Err(ctx.mismatch(TaskKind::Translation)),
        }
    }

    pub fn schema(ctx: &BridgeContext<'_>, mode: InferenceMode) -> Result<Self> {
        let to = Self::target(ctx)?;
        let base = BridgeBase::new(ctx, mode, Some(SCHEMA_TEMPLATE.to_string()), None);
        let schema = OutputSchema::new("Translation")
            .with_description(base.prompt_signature_description.as_deref())
            .field(FieldSpec::new("translation", FieldKind::String));
        Ok(Self {
            base,
            to,
            signature: PromptSignature::Schema(schema),
        })
    }

    pub fn reasoning(ctx: &BridgeContext<'_>) -> Result<Self> {
        let to = Self::target(ctx)?;
        let base = BridgeBase::new(
            ctx,
            InferenceMode::ChainOfThought,
            None,
            Some(REASONING_DESCRIPTION),
        );
        let signature = DeclarativeSignature::new(
            "Translation",
            base.prompt_signature_description.clone().unwrap_or_default(),
        )
        .input(FieldSpec::new("text", FieldKind::String).describe("Text to translate."))
        .input(FieldSpec::new("to", FieldKind::String).describe("Language to translate the text into."))
        .output(FieldSpec::new("translation", FieldKind::String).describe("Translated text."));
        Ok(Self {
            base,
            to,
            signature: PromptSignature::Declarative(signature),
        })
    }
}

impl Bridge for TranslationBridge {
    fn task_id(&self) -> &str {
        &self.base.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        self.base.prompt_template.as_deref()
    }

    fn prompt_signature_description(&self) -> Option<&str> {
        self.base.prompt_signature_description.as_deref()
    }

    fn prompt_signature(&self) -> &PromptSignature {
        &self.signature
    }

    fn inference_mode(&self) -> InferenceMode {
        self.base.mode
    }

    fn extract(&self, docs: &[Document]) -> Vec<FieldValues> {
        docs.iter()
            .map(|doc| {
                let mut fields = text_fields(doc);
                fields.insert("to".to_string(), Value::from(self.to.as_str()));
                fields
            })
            .collect()
    }

    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>> {
        join_chunk_texts(results, offsets, "translation")
    }
}

pub(crate) fn register(registry: &mut BridgeRegistry) {
    let task = TaskKind::Translation;
    registry.register(task, EngineKind::Chat, |ctx| {
        TranslationBridge::schema(ctx, InferenceMode::Chat).map(boxed)
    });
    registry.register(task, EngineKind::Constrained, |ctx| {
        TranslationBridge::schema(ctx, InferenceMode::Json).map(boxed)
    });
    registry.register(task, EngineKind::Reasoning, |ctx| {
        TranslationBridge::reasoning(ctx).map(boxed)
    });
}

pub(crate) fn validate_fewshot(examples: &[FieldValues]) -> Result<()> {
    typed_examples::<FewshotExample>(examples).map(|_| ())
}

pub(crate) fn to_dataset(task_id: &str, docs: &[Document]) -> Result<Dataset> {
    let mut dataset = Dataset::new(task_id, &["text", "translation"]);
    for (doc, output) in task_results(task_id, docs)? {
        let translation = output
            .as_text()
            .ok_or_else(|| unexpected_output(task_id, output))?;
        dataset.push_row(vec![text_value(doc), Value::from(translation)])?;
    }
    Ok(dataset)
}
