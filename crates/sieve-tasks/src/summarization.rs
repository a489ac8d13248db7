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
Your goal is to summarize a text. This summary shouldn't be longer than {{ max_n }} words.

{% if examples %}
Examples:
----------
{% for example in examples %}
Text: \"{{ example.text }}\"
Max. number of words in summary: {{ example.max_n }}
Summary: \"{{ example.summary }}\"
{% endfor %}
----------
{% endif %}
========
Text: {{ text }}
Max. number of words in summary: {{ max_n }}
Summary:
";

const REASONING_DESCRIPTION: &str = "Summary of a longer text.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub max_n: usize,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

pub struct SummarizationBridge {
    base: BridgeBase,
    max_n: usize,
    signature: PromptSignature,
}

impl SummarizationBridge {
    fn max_n(ctx: &BridgeContext<'_>) -> Result<usize> {
        match ctx.spec {
            TaskSpec::Summarization { max_n: 0 } => Err(SieveError::Config(
                "summarization max_n must be positive".to_string(),
            )),
            TaskSpec::Summarization { max_n } => Ok(*max_n),
            _ => Err(ctx.mismatch(TaskKind::Summarization)),
        }
    }

    pub fn schema(ctx: &BridgeContext<'_>, mode: InferenceMode) -> Result<Self> {
        let max_n = Self::max_n(ctx)?;
        let base = BridgeBase::new(ctx, mode, Some(SCHEMA_TEMPLATE.to_string()), None);
        let schema = OutputSchema::new("Summary")
            .with_description(base.prompt_signature_description.as_deref())
            .field(FieldSpec::new("summary", FieldKind::String));
        Ok(Self {
            base,
            max_n,
            signature: PromptSignature::Schema(schema),
        })
    }

    pub fn reasoning(ctx: &BridgeContext<'_>) -> Result<Self> {
        let max_n = Self::max_n(ctx)?;
        let base = BridgeBase::new(
            ctx,
            InferenceMode::ChainOfThought,
            None,
            Some(REASONING_DESCRIPTION),
        );
        let signature = DeclarativeSignature::new(
            "Summary",
            base.prompt_signature_description.clone().unwrap_or_default(),
        )
        .input(FieldSpec::new("text", FieldKind::String).describe("Text to summarize."))
        .input(
            FieldSpec::new("max_n", FieldKind::Integer)
                .describe("Maximal number of words to use for summary."),
        )
        .output(FieldSpec::new("summary", FieldKind::String).describe("Summary of text."));
        Ok(Self {
            base,
            max_n,
            signature: PromptSignature::Declarative(signature),
        })
    }
}

impl Bridge for SummarizationBridge {
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
                fields.insert("max_n".to_string(), Value::from(self.max_n));
                fields
            })
            .collect()
    }

    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>> {
        join_chunk_texts(results, offsets, "summary")
    }
}

pub(crate) fn register(registry: &mut BridgeRegistry) {
    let task = TaskKind::Summarization;
    registry.register(task, EngineKind::Chat, |ctx| {
        SummarizationBridge::schema(ctx, InferenceMode::Chat).map(boxed)
    });
    registry.register(task, EngineKind::Constrained, |ctx| {
        SummarizationBridge::schema(ctx, InferenceMode::Json).map(boxed)
    });
    registry.register(task, EngineKind::Reasoning, |ctx| {
        SummarizationBridge::reasoning(ctx).map(boxed)
    });
}

pub(crate) fn validate_fewshot(examples: &[FieldValues]) -> Result<()> {
    typed_examples::<FewshotExample>(examples).map(|_| ())
}

pub(crate) fn to_dataset(task_id: &str, docs: &[Document]) -> Result<Dataset> {
    let mut dataset = Dataset::new(task_id, &["text", "summary"]);
    for (doc, output) in task_results(task_id, docs)? {
        let summary = output
            .as_text()
            .ok_or_else(|| unexpected_output(task_id, output))?;
        dataset.push_row(vec![text_value(doc), Value::from(summary)])?;
    }
    Ok(dataset)
}
