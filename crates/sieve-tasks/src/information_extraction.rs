use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use sieve_core::document::Document;
use sieve_core::engine::{ChunkResult, EngineKind, FieldValues, InferenceMode};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::TaskOutput;
use sieve_core::signature::{DeclarativeSignature, FieldKind, FieldSpec, OutputSchema, PromptSignature};

use crate::bridge::{boxed, doc_slices, Bridge, BridgeBase, BridgeContext, BridgeRegistry};
use crate::dataset::{task_results, text_value, unexpected_output, Dataset};
use crate::task::{typed_examples, TaskKind, TaskSpec};

const DEFAULT_DESCRIPTION: &str = "Find all occurrences of this kind of entity within the text.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub reasoning: String,
    pub entities: Vec<Value>,
}

fn schema_template(entity: &OutputSchema) -> String {
    let fields: Vec<String> = entity
        .fields
        .iter()
        .map(|f| match &f.description {
            Some(desc) => format!("- {}: {desc}", f.name),
            None => format!("- {}", f.name),
        })
        .collect();

    format!(
        "\
Find all occurrences of entities of type \"{name}\" within the text. An entity has these fields:
{fields}
Provide the reasoning for your decision, then list every entity found. Return an empty list if
there are none.

{{% if examples %}}
Examples:
----------
{{% for example in examples %}}
Text: \"{{{{ example.text }}}}\"
Reasoning: \"{{{{ example.reasoning }}}}\"
Entities:
{{% for entity in example.entities %}}
    {{{{ entity }}}}
{{% endfor %}}
{{% endfor %}}
----------
{{% endif %}}
========
Text: {{{{ text }}}}
Output:
",
        name = entity.name,
        fields = fields.join("\n"),
    )
}

pub struct InformationExtractionBridge {
    base: BridgeBase,
    signature: PromptSignature,
    dedup: bool,
}

impl InformationExtractionBridge {
    fn entity_schema<'a>(ctx: &BridgeContext<'a>) -> Result<&'a OutputSchema> {
        match ctx.spec {
            TaskSpec::InformationExtraction { entity_schema } => {
                if !entity_schema.is_comparable() {
                    warn!(
                        task_id = ctx.task_id,
                        entity = %entity_schema.name,
                        "Entity schema has floating-point fields; entities will not be deduplicated"
                    );
                }
                Ok(entity_schema)
            }
            _ => Err(ctx.mismatch(TaskKind::InformationExtraction)),
        }
    }

    fn entities_field(entity: &OutputSchema) -> FieldSpec {
        FieldSpec::new(
            "entities",
            FieldKind::list(FieldKind::Object {
                fields: entity.fields.clone(),
            }),
        )
        .describe(format!("All {} entities found in the text.", entity.name))
    }

    pub fn schema(ctx: &BridgeContext<'_>, mode: InferenceMode) -> Result<Self> {
        let entity = Self::entity_schema(ctx)?;
        let base = BridgeBase::new(ctx, mode, Some(schema_template(entity)), None);
        let schema = OutputSchema::new("Entities")
            .with_description(base.prompt_signature_description.as_deref())
            .field(FieldSpec::new("reasoning", FieldKind::String).optional())
            .field(Self::entities_field(entity));
        Ok(Self {
            base,
            signature: PromptSignature::Schema(schema),
            dedup: entity.is_comparable(),
        })
    }

    pub fn reasoning(ctx: &BridgeContext<'_>) -> Result<Self> {
        let entity = Self::entity_schema(ctx)?;
        let base = BridgeBase::new(
            ctx,
            InferenceMode::ChainOfThought,
            None,
            Some(DEFAULT_DESCRIPTION),
        );
        let signature = DeclarativeSignature::new(
            "InformationExtraction",
            base.prompt_signature_description.clone().unwrap_or_default(),
        )
        .input(FieldSpec::new("text", FieldKind::String).describe("Text to extract entities from."))
        .output(Self::entities_field(entity));
        Ok(Self {
            base,
            signature: PromptSignature::Declarative(signature),
            dedup: entity.is_comparable(),
        })
    }

    fn consolidate_slice(&self, slice: &[ChunkResult]) -> Vec<Value> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();
        let found = slice
            .iter()
            .flatten()
            .filter_map(|value| value.get("entities").and_then(Value::as_array))
            .flatten();
        for entity in found {
            // serde_json maps are key-ordered, so equal entities serialize identically.
            if self.dedup && !seen.insert(entity.to_string()) {
                continue;
            }
            entities.push(entity.clone());
        }
        entities
    }
}

impl Bridge for InformationExtractionBridge {
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

    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>> {
        Ok(doc_slices(results, offsets)?
            .into_iter()
            .map(|slice| TaskOutput::Entities(self.consolidate_slice(slice)))
            .collect())
    }
}

pub(crate) fn register(registry: &mut BridgeRegistry) {
    let task = TaskKind::InformationExtraction;
    registry.register(task, EngineKind::Chat, |ctx| {
        InformationExtractionBridge::schema(ctx, InferenceMode::Chat).map(boxed)
    });
    registry.register(task, EngineKind::Constrained, |ctx| {
        InformationExtractionBridge::schema(ctx, InferenceMode::Json).map(boxed)
    });
    registry.register(task, EngineKind::Reasoning, |ctx| {
        InformationExtractionBridge::reasoning(ctx).map(boxed)
    });
}

pub(crate) fn validate_fewshot(entity_schema: &OutputSchema, examples: &[FieldValues]) -> Result<()> {
    for (i, example) in typed_examples::<FewshotExample>(examples)?.iter().enumerate() {
        for entity in &example.entities {
            entity_schema
                .validate(entity)
                .map_err(|e| SieveError::InvalidFewshot(format!("example {i}: {e}")))?;
        }
    }
    Ok(())
}

pub(crate) fn to_dataset(task_id: &str, docs: &[Document]) -> Result<Dataset> {
    let mut dataset = Dataset::new(task_id, &["text", "entities"]);
    for (doc, output) in task_results(task_id, docs)? {
        let entities = output
            .as_entities()
            .ok_or_else(|| unexpected_output(task_id, output))?;
        dataset.push_row(vec![text_value(doc), Value::Array(entities.to_vec())])?;
    }
    Ok(dataset)
}
