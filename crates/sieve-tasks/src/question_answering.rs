use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sieve_core::document::Document;
use sieve_core::engine::{ChunkResult, EngineKind, FieldValues, InferenceMode};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::{Answer, TaskOutput};
use sieve_core::signature::{DeclarativeSignature, FieldKind, FieldSpec, OutputSchema, PromptSignature};

use crate::bridge::{boxed, doc_slices, text_fields, Bridge, BridgeBase, BridgeContext, BridgeRegistry};
use crate::dataset::{task_results, text_value, unexpected_output, Dataset};
use crate::task::{typed_examples, TaskKind, TaskSpec};

const SCHEMA_TEMPLATE: &str = "\
Use the given text to answer the following questions. Answer every question, in order, with
exactly one answer per question. Provide the reasoning for your answers.
Questions:
{% for question in questions %}
- {{ question }}
{% endfor %}

{% if examples %}
Examples:
----------
{% for example in examples %}
Text: \"{{ example.text }}\"
Questions: {{ example.questions }}
Reasoning: \"{{ example.reasoning }}\"
Answers: {{ example.answers }}
{% endfor %}
----------
{% endif %}
========
Text: {{ text }}
Output:
";

const REASONING_DESCRIPTION: &str =
    "Multi-question answering. Answer every question based on the text, one answer per question.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub reasoning: String,
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    /// `{"reasoning": ..., "answers": ["...", ...]}`, answers in question order.
    Answers,
    /// `[{"label": <question>, "text": <answer>, "score": ...}]`
    Spans,
}

pub struct QuestionAnsweringBridge {
    base: BridgeBase,
    questions: Vec<String>,
    signature: PromptSignature,
    shape: ResultShape,
}

impl QuestionAnsweringBridge {
    fn questions(ctx: &BridgeContext<'_>) -> Result<Vec<String>> {
        match ctx.spec {
            TaskSpec::QuestionAnswering { questions } if questions.is_empty() => Err(
                SieveError::Config("question answering needs at least one question".to_string()),
            ),
            TaskSpec::QuestionAnswering { questions } => Ok(questions.clone()),
            _ => Err(ctx.mismatch(TaskKind::QuestionAnswering)),
        }
    }

    fn answers_field() -> FieldSpec {
        FieldSpec::new("answers", FieldKind::list(FieldKind::String))
            .describe("One answer per question, in question order.")
    }

    pub fn schema(ctx: &BridgeContext<'_>, mode: InferenceMode) -> Result<Self> {
        let questions = Self::questions(ctx)?;
        let base = BridgeBase::new(ctx, mode, Some(SCHEMA_TEMPLATE.to_string()), None);
        let schema = OutputSchema::new("QuestionAnswering")
            .with_description(base.prompt_signature_description.as_deref())
            .field(FieldSpec::new("reasoning", FieldKind::String).optional())
            .field(Self::answers_field());
        Ok(Self {
            base,
            questions,
            signature: PromptSignature::Schema(schema),
            shape: ResultShape::Answers,
        })
    }

    pub fn reasoning(ctx: &BridgeContext<'_>) -> Result<Self> {
        let questions = Self::questions(ctx)?;
        let base = BridgeBase::new(
            ctx,
            InferenceMode::ChainOfThought,
            None,
            Some(REASONING_DESCRIPTION),
        );
        let signature = DeclarativeSignature::new(
            "QuestionAnswering",
            base.prompt_signature_description.clone().unwrap_or_default(),
        )
        .input(FieldSpec::new("text", FieldKind::String).describe("Text to use for answering."))
        .input(
            FieldSpec::new("questions", FieldKind::list(FieldKind::String))
                .describe("Questions to answer."),
        )
        .output(Self::answers_field());
        Ok(Self {
            base,
            questions,
            signature: PromptSignature::Declarative(signature),
            shape: ResultShape::Answers,
        })
    }

    pub fn tagger(ctx: &BridgeContext<'_>) -> Result<Self> {
        let questions = Self::questions(ctx)?;
        Ok(Self {
            base: BridgeBase::new(ctx, InferenceMode::QuestionAnswering, None, None),
            signature: PromptSignature::labels(questions.iter().cloned()),
            questions,
            shape: ResultShape::Spans,
        })
    }

    /// Non-empty chunk answers to each question, joined with a space.
    fn join_answers(&self, slice: &[ChunkResult]) -> Vec<String> {
        let mut joined: Vec<Vec<&str>> = vec![Vec::new(); self.questions.len()];
        let chunk_answers = slice
            .iter()
            .flatten()
            .filter_map(|value| value.get("answers").and_then(Value::as_array));
        for answers in chunk_answers {
            for (slot, answer) in joined.iter_mut().zip(answers) {
                match answer.as_str().map(str::trim) {
                    Some(text) if !text.is_empty() => slot.push(text),
                    _ => {}
                }
            }
        }
        joined.into_iter().map(|parts| parts.join(" ")).collect()
    }

    /// Highest-scoring span per question across all chunks; earlier spans win ties.
    fn best_spans(&self, slice: &[ChunkResult]) -> Vec<String> {
        let mut best: Vec<Option<(f64, &str)>> = vec![None; self.questions.len()];
        let spans = slice
            .iter()
            .flatten()
            .filter_map(Value::as_array)
            .flatten();
        for span in spans {
            let (Some(label), Some(text), Some(score)) = (
                span.get("label").and_then(Value::as_str),
                span.get("text").and_then(Value::as_str),
                span.get("score").and_then(Value::as_f64),
            ) else {
                continue;
            };
            let Some(i) = self.questions.iter().position(|q| q == label) else {
                continue;
            };
            if best[i].map_or(true, |(top, _)| score > top) {
                best[i] = Some((score, text));
            }
        }
        best.into_iter()
            .map(|b| b.map(|(_, text)| text.to_string()).unwrap_or_default())
            .collect()
    }
}

impl Bridge for QuestionAnsweringBridge {
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
                if self.shape == ResultShape::Answers {
                    fields.insert("questions".to_string(), Value::from(self.questions.clone()));
                }
                fields
            })
            .collect()
    }

    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>> {
        Ok(doc_slices(results, offsets)?
            .into_iter()
            .map(|slice| {
                let answers = match self.shape {
                    ResultShape::Answers => self.join_answers(slice),
                    ResultShape::Spans => self.best_spans(slice),
                };
                TaskOutput::Answers(
                    self.questions
                        .iter()
                        .zip(answers)
                        .map(|(question, answer)| Answer {
                            question: question.clone(),
                            answer,
                        })
                        .collect(),
                )
            })
            .collect())
    }
}

pub(crate) fn register(registry: &mut BridgeRegistry) {
    let task = TaskKind::QuestionAnswering;
    registry.register(task, EngineKind::Chat, |ctx| {
        QuestionAnsweringBridge::schema(ctx, InferenceMode::Chat).map(boxed)
    });
    registry.register(task, EngineKind::Constrained, |ctx| {
        QuestionAnsweringBridge::schema(ctx, InferenceMode::Json).map(boxed)
    });
    registry.register(task, EngineKind::Reasoning, |ctx| {
        QuestionAnsweringBridge::reasoning(ctx).map(boxed)
    });
    registry.register(task, EngineKind::Tagger, |ctx| {
        QuestionAnsweringBridge::tagger(ctx).map(boxed)
    });
}

pub(crate) fn validate_fewshot(examples: &[FieldValues]) -> Result<()> {
    for (i, example) in typed_examples::<FewshotExample>(examples)?.iter().enumerate() {
        if example.questions.len() != example.answers.len() {
            return Err(SieveError::InvalidFewshot(format!(
                "example {i} has {} questions but {} answers",
                example.questions.len(),
                example.answers.len()
            )));
        }
    }
    Ok(())
}

pub(crate) fn to_dataset(task_id: &str, docs: &[Document]) -> Result<Dataset> {
    let mut dataset = Dataset::new(task_id, &["text", "answers"]);
    for (doc, output) in task_results(task_id, docs)? {
        let answers: Vec<&str> = output
            .as_answers()
            .ok_or_else(|| unexpected_output(task_id, output))?
            .iter()
            .map(|a| a.answer.as_str())
            .collect();
        dataset.push_row(vec![text_value(doc), Value::from(answers)])?;
    }
    Ok(dataset)
}
