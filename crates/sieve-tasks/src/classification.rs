//! Multi-label classification. Every declared label receives a confidence in `[0, 1]`; chunk
//! scores are clamped, then averaged over the document's chunks.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sieve_core::document::Document;
use sieve_core::engine::{ChunkResult, EngineKind, FieldValues, InferenceMode};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::{Classification, LabelScore, TaskOutput};
use sieve_core::signature::{DeclarativeSignature, FieldKind, FieldSpec, OutputSchema, PromptSignature};

use crate::bridge::{boxed, doc_slices, text_fields, Bridge, BridgeBase, BridgeContext, BridgeRegistry};
use crate::dataset::{task_results, text_value, unexpected_output, Dataset};
use crate::task::{typed_examples, TaskKind, TaskSpec};

const SCHEMA_TEMPLATE: &str = "\
Perform multi-label classification of the provided text given these labels: {{ labels }}.
For each label, provide the confidence with which you believe the text should be assigned this
label. A confidence of 1.0 means the text should absolutely be assigned this label, 0 means the
opposite. Confidence per label must ALWAYS be between 0 and 1 and does not have to add up to 1
across labels. Provide the reasoning for your decision.

{% if examples %}
Examples:
----------
{% for example in examples %}
Text: \"{{ example.text }}\"
Reasoning: \"{{ example.reasoning }}\"
Output:
{% for pair in example.confidence_per_label %}
    {{ pair.key }}: {{ pair.value }}
{% endfor %}
{% endfor %}
----------
{% endif %}
========
Text: {{ text }}
Output:
";

const REASONING_DESCRIPTION: &str = "\
Multi-label classification of the provided text given the provided labels. For each label, \
provide the confidence with which you believe that the provided text should be assigned this \
label. A confidence of 1.0 means that this text should absolutely be assigned this label, 0 \
means the opposite. Confidence per label should always be between 0 and 1. Confidence across \
labels does not have to add up to 1.";

const ZERO_SHOT_HYPOTHESIS: &str = "This text is about {}.";

/// Names the schema bridges already use for their own fields and prompt values.
const RESERVED_LABELS: [&str; 2] = ["reasoning", "labels"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub reasoning: String,
    pub confidence_per_label: HashMap<String, f64>,
}

/// How chunk results of a given engine kind are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    /// `{"reasoning": ..., "<label>": score, ...}`
    Flat,
    /// `{"reasoning": ..., "confidence_per_label": {"<label>": score}}`
    Nested,
    /// `{"labels": [...], "scores": [...]}`
    Parallel,
    /// `[{"label": ..., "score": ...}]`
    Pairs,
}

impl ResultShape {
    fn has_reasoning(self) -> bool {
        matches!(self, Self::Flat | Self::Nested)
    }

    fn scores<'a>(self, value: &'a Value, labels: &'a [String]) -> Vec<(&'a str, f64)> {
        match self {
            Self::Flat => labels
                .iter()
                .filter_map(|label| Some((label.as_str(), value.get(label.as_str())?.as_f64()?)))
                .collect(),
            Self::Nested => value
                .get("confidence_per_label")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(label, score)| Some((label.as_str(), score.as_f64()?)))
                        .collect()
                })
                .unwrap_or_default(),
            Self::Parallel => {
                let labels = value.get("labels").and_then(Value::as_array);
                let scores = value.get("scores").and_then(Value::as_array);
                match (labels, scores) {
                    (Some(labels), Some(scores)) => labels
                        .iter()
                        .zip(scores)
                        .filter_map(|(l, s)| Some((l.as_str()?, s.as_f64()?)))
                        .collect(),
                    _ => Vec::new(),
                }
            }
            Self::Pairs => value
                .as_array()
                .map(|pairs| {
                    pairs
                        .iter()
                        .filter_map(|p| {
                            Some((p.get("label")?.as_str()?, p.get("score")?.as_f64()?))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

pub struct ClassificationBridge {
    base: BridgeBase,
    labels: Vec<String>,
    signature: PromptSignature,
    shape: ResultShape,
}

impl ClassificationBridge {
    fn labels(ctx: &BridgeContext<'_>) -> Result<Vec<String>> {
        match ctx.spec {
            TaskSpec::Classification { labels } if labels.is_empty() => Err(SieveError::Config(
                "classification needs at least one label".to_string(),
            )),
            TaskSpec::Classification { labels } => {
                if let Some(label) = labels.iter().find(|l| RESERVED_LABELS.contains(&l.as_str())) {
                    return Err(SieveError::Config(format!(
                        "'{label}' is reserved and cannot be used as a label"
                    )));
                }
                Ok(labels.clone())
            }
            _ => Err(ctx.mismatch(TaskKind::Classification)),
        }
    }

    /// For engines that generate JSON against a schema, either constrained or prompted.
    pub fn schema(ctx: &BridgeContext<'_>, mode: InferenceMode) -> Result<Self> {
        let labels = Self::labels(ctx)?;
        let base = BridgeBase::new(ctx, mode, Some(SCHEMA_TEMPLATE.to_string()), None);
        let schema = labels.iter().fold(
            OutputSchema::new("MultilabelPrediction")
                .with_description(base.prompt_signature_description.as_deref())
                .field(FieldSpec::new("reasoning", FieldKind::String).optional()),
            |schema, label| schema.field(FieldSpec::new(label, FieldKind::Float)),
        );
        Ok(Self {
            base,
            labels,
            signature: PromptSignature::Schema(schema),
            shape: ResultShape::Flat,
        })
    }

    pub fn reasoning(ctx: &BridgeContext<'_>) -> Result<Self> {
        let labels = Self::labels(ctx)?;
        let base = BridgeBase::new(
            ctx,
            InferenceMode::ChainOfThought,
            None,
            Some(REASONING_DESCRIPTION),
        );
        let signature = DeclarativeSignature::new(
            "TextClassification",
            base.prompt_signature_description.clone().unwrap_or_default(),
        )
        .input(FieldSpec::new("text", FieldKind::String).describe("Text to classify."))
        .output(
            FieldSpec::new(
                "confidence_per_label",
                FieldKind::Scores {
                    labels: labels.clone(),
                },
            )
            .describe("Confidence per label that text should be classified with this label."),
        );
        Ok(Self {
            base,
            labels,
            signature: PromptSignature::Declarative(signature),
            shape: ResultShape::Nested,
        })
    }

    pub fn zero_shot(ctx: &BridgeContext<'_>) -> Result<Self> {
        let labels = Self::labels(ctx)?;
        Ok(Self {
            base: BridgeBase::new(
                ctx,
                InferenceMode::ZeroShotClassification,
                Some(ZERO_SHOT_HYPOTHESIS.to_string()),
                None,
            ),
            signature: PromptSignature::labels(labels.iter().cloned()),
            labels,
            shape: ResultShape::Parallel,
        })
    }

    pub fn tagger(ctx: &BridgeContext<'_>) -> Result<Self> {
        let labels = Self::labels(ctx)?;
        Ok(Self {
            base: BridgeBase::new(ctx, InferenceMode::Classification, None, None),
            signature: PromptSignature::labels(labels.iter().cloned()),
            labels,
            shape: ResultShape::Pairs,
        })
    }

    fn consolidate_slice(&self, slice: &[ChunkResult]) -> Classification {
        let mut totals = vec![0.0_f64; self.labels.len()];
        for value in slice.iter().flatten() {
            for (label, score) in self.shape.scores(value, &self.labels) {
                if let Some(i) = self.labels.iter().position(|l| l == label) {
                    totals[i] += clamp_score(score);
                }
            }
        }

        let chunks = slice.len().max(1) as f64;
        let mut labels: Vec<LabelScore> = self
            .labels
            .iter()
            .zip(totals)
            .map(|(label, total)| LabelScore::new(label.as_str(), total / chunks))
            .collect();
        // Stable: ties keep declaration order.
        labels.sort_by(|a, b| b.score.total_cmp(&a.score));

        Classification {
            labels,
            reasoning: self
                .shape
                .has_reasoning()
                .then(|| crate::bridge::collect_reasoning(slice)),
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

impl Bridge for ClassificationBridge {
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
                if self.shape == ResultShape::Flat {
                    fields.insert("labels".to_string(), Value::from(self.labels.clone()));
                }
                fields
            })
            .collect()
    }

    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>> {
        Ok(doc_slices(results, offsets)?
            .into_iter()
            .map(|slice| TaskOutput::Classification(self.consolidate_slice(slice)))
            .collect())
    }
}

pub(crate) fn register(registry: &mut BridgeRegistry) {
    let task = TaskKind::Classification;
    registry.register(task, EngineKind::Chat, |ctx| {
        ClassificationBridge::schema(ctx, InferenceMode::Chat).map(boxed)
    });
    registry.register(task, EngineKind::Constrained, |ctx| {
        ClassificationBridge::schema(ctx, InferenceMode::Json).map(boxed)
    });
    registry.register(task, EngineKind::Reasoning, |ctx| {
        ClassificationBridge::reasoning(ctx).map(boxed)
    });
    registry.register(task, EngineKind::ZeroShot, |ctx| {
        ClassificationBridge::zero_shot(ctx).map(boxed)
    });
    registry.register(task, EngineKind::Tagger, |ctx| {
        ClassificationBridge::tagger(ctx).map(boxed)
    });
}

pub(crate) fn validate_fewshot(labels: &[String], examples: &[FieldValues]) -> Result<()> {
    for (i, example) in typed_examples::<FewshotExample>(examples)?.iter().enumerate() {
        for (label, score) in &example.confidence_per_label {
            if !labels.contains(label) {
                return Err(SieveError::InvalidFewshot(format!(
                    "example {i} uses undeclared label '{label}'"
                )));
            }
            if !(0.0..=1.0).contains(score) {
                return Err(SieveError::InvalidFewshot(format!(
                    "example {i} has confidence {score} for '{label}' outside [0, 1]"
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn to_dataset(task_id: &str, docs: &[Document]) -> Result<Dataset> {
    let mut dataset = Dataset::new(task_id, &["text", "labels", "scores"]);
    for (doc, output) in task_results(task_id, docs)? {
        let classification = output
            .as_classification()
            .ok_or_else(|| unexpected_output(task_id, output))?;
        let labels: Vec<&str> = classification.labels.iter().map(|l| l.label.as_str()).collect();
        let scores: Vec<f64> = classification.labels.iter().map(|l| l.score).collect();
        dataset.push_row(vec![text_value(doc), Value::from(labels), Value::from(scores)])?;
    }
    Ok(dataset)
}
