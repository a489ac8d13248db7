use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use sieve_core::document::Document;
use sieve_core::engine::{Engine, EngineKind, FieldValues};
use sieve_core::error::{Result, SieveError};
use sieve_core::signature::{OutputSchema, PromptSignature};

use crate::bridge::{Bridge, BridgeContext, BridgeRegistry};
use crate::dataset::Dataset;
use crate::{classification, information_extraction, question_answering, summarization, translation};

/// What a predictive task does, with its task-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    /// Multi-label classification; every label gets a score in `[0, 1]`.
    Classification { labels: Vec<String> },
    /// Extraction of every entity matching `entity_schema`.
    InformationExtraction { entity_schema: OutputSchema },
    QuestionAnswering { questions: Vec<String> },
    /// Summaries of at most roughly `max_n` words.
    Summarization { max_n: usize },
    Translation { to: String },
}

impl TaskSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Classification { .. } => TaskKind::Classification,
            Self::InformationExtraction { .. } => TaskKind::InformationExtraction,
            Self::QuestionAnswering { .. } => TaskKind::QuestionAnswering,
            Self::Summarization { .. } => TaskKind::Summarization,
            Self::Translation { .. } => TaskKind::Translation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Classification,
    InformationExtraction,
    QuestionAnswering,
    Summarization,
    Translation,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Classification,
        TaskKind::InformationExtraction,
        TaskKind::QuestionAnswering,
        TaskKind::Summarization,
        TaskKind::Translation,
    ];

    /// Also the default task id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "Classification",
            Self::InformationExtraction => "InformationExtraction",
            Self::QuestionAnswering => "QuestionAnswering",
            Self::Summarization => "Summarization",
            Self::Translation => "Translation",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task applied to a document batch through one engine.
pub struct PredictiveTask {
    id: String,
    spec: TaskSpec,
    engine: Arc<dyn Engine>,
    bridge: Box<dyn Bridge>,
    custom_prompt_template: Option<String>,
    custom_prompt_signature_description: Option<String>,
    fewshot_examples: Vec<FieldValues>,
    include_meta: bool,
}

pub struct PredictiveTaskBuilder {
    spec: TaskSpec,
    engine: Arc<dyn Engine>,
    task_id: Option<String>,
    prompt_template: Option<String>,
    prompt_signature_description: Option<String>,
    fewshot_examples: Result<Vec<FieldValues>>,
    include_meta: bool,
}

impl PredictiveTaskBuilder {
    pub fn task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn prompt_signature_description(mut self, description: impl Into<String>) -> Self {
        self.prompt_signature_description = Some(description.into());
        self
    }

    /// Store each document's raw chunk results in `Document::meta` under the task id.
    pub fn include_meta(mut self, include: bool) -> Self {
        self.include_meta = include;
        self
    }

    /// Typed few-shot examples, e.g. [`crate::classification::FewshotExample`].
    pub fn fewshot_examples<E, I>(mut self, examples: I) -> Self
    where
        E: Serialize,
        I: IntoIterator<Item = E>,
    {
        self.fewshot_examples = examples.into_iter().map(|e| example_fields(&e)).collect();
        self
    }

    pub(crate) fn fewshot_values(mut self, examples: Vec<FieldValues>) -> Self {
        self.fewshot_examples = Ok(examples);
        self
    }

    pub fn build(self) -> Result<PredictiveTask> {
        self.build_with(BridgeRegistry::builtin())
    }

    /// Fails with a configuration error if no bridge exists for the engine, the engine lacks
    /// the bridge's inference mode, or the few-shot examples are invalid or unusable.
    pub fn build_with(self, registry: &BridgeRegistry) -> Result<PredictiveTask> {
        let id = self
            .task_id
            .unwrap_or_else(|| self.spec.kind().as_str().to_string());
        let engine_kind = self.engine.kind();

        let bridge = registry.create(
            engine_kind,
            &BridgeContext {
                task_id: &id,
                spec: &self.spec,
                prompt_template: self.prompt_template.as_deref(),
                prompt_signature_description: self.prompt_signature_description.as_deref(),
            },
        )?;
        self.engine.ensure_mode(bridge.inference_mode())?;

        let fewshot_examples = self.fewshot_examples?;
        validate_fewshot(&self.spec, &fewshot_examples)?;
        if !fewshot_examples.is_empty() && !self.engine.supports_few_shotting() {
            return Err(SieveError::FewshotNotSupported {
                task: id,
                engine: engine_kind,
            });
        }

        // Surfaces template and signature errors now rather than on the first run.
        self.engine.build_executable(
            bridge.inference_mode(),
            bridge.prompt_template(),
            bridge.prompt_signature(),
            &fewshot_examples,
        )?;

        debug!(
            task_id = %id,
            engine = %engine_kind,
            mode = %bridge.inference_mode(),
            fewshot = fewshot_examples.len(),
            "Built predictive task"
        );

        Ok(PredictiveTask {
            id,
            spec: self.spec,
            engine: self.engine,
            bridge,
            custom_prompt_template: self.prompt_template,
            custom_prompt_signature_description: self.prompt_signature_description,
            fewshot_examples,
            include_meta: self.include_meta,
        })
    }
}

fn example_fields<E: Serialize>(example: &E) -> Result<FieldValues> {
    match serde_json::to_value(example)? {
        Value::Object(fields) => Ok(fields),
        other => Err(SieveError::InvalidFewshot(format!(
            "few-shot example must serialize to an object, got {other}"
        ))),
    }
}

fn validate_fewshot(spec: &TaskSpec, examples: &[FieldValues]) -> Result<()> {
    match spec {
        TaskSpec::Classification { labels } => classification::validate_fewshot(labels, examples),
        TaskSpec::InformationExtraction { entity_schema } => {
            information_extraction::validate_fewshot(entity_schema, examples)
        }
        TaskSpec::QuestionAnswering { .. } => question_answering::validate_fewshot(examples),
        TaskSpec::Summarization { .. } => summarization::validate_fewshot(examples),
        TaskSpec::Translation { .. } => translation::validate_fewshot(examples),
    }
}

/// Deserializes few-shot examples into the task's typed example struct.
pub(crate) fn typed_examples<T: serde::de::DeserializeOwned>(
    examples: &[FieldValues],
) -> Result<Vec<T>> {
    examples
        .iter()
        .enumerate()
        .map(|(i, fields)| {
            serde_json::from_value(Value::Object(fields.clone()))
                .map_err(|e| SieveError::InvalidFewshot(format!("example {i}: {e}")))
        })
        .collect()
}

/// Flattens documents into chunk inputs. Each chunk input is the document's extracted values
/// with `text` replaced by the chunk text. Returns the inputs and each document's range into
/// them.
pub fn fan_out(
    docs: &[Document],
    values: Vec<FieldValues>,
) -> Result<(Vec<FieldValues>, Vec<Range<usize>>)> {
    if values.len() != docs.len() {
        return Err(SieveError::ContractViolation(format!(
            "extracted {} value sets for {} documents",
            values.len(),
            docs.len()
        )));
    }

    let mut inputs = Vec::new();
    let mut offsets = Vec::with_capacity(docs.len());
    for (index, (doc, fields)) in docs.iter().zip(values).enumerate() {
        let chunks = doc
            .effective_chunks()
            .ok_or(SieveError::MissingText { index })?;
        let start = inputs.len();
        for chunk in chunks {
            let mut input = fields.clone();
            input.insert("text".to_string(), Value::String(chunk.to_string()));
            inputs.push(input);
        }
        offsets.push(start..inputs.len());
    }
    Ok((inputs, offsets))
}

impl PredictiveTask {
    pub fn builder(spec: TaskSpec, engine: Arc<dyn Engine>) -> PredictiveTaskBuilder {
        PredictiveTaskBuilder {
            spec,
            engine,
            task_id: None,
            prompt_template: None,
            prompt_signature_description: None,
            fewshot_examples: Ok(Vec::new()),
            include_meta: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.spec.kind()
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Effective prompt template, custom or default.
    pub fn prompt_template(&self) -> Option<&str> {
        self.bridge.prompt_template()
    }

    pub fn prompt_signature_description(&self) -> Option<&str> {
        self.bridge.prompt_signature_description()
    }

    pub fn prompt_signature(&self) -> &PromptSignature {
        self.bridge.prompt_signature()
    }

    pub fn custom_prompt_template(&self) -> Option<&str> {
        self.custom_prompt_template.as_deref()
    }

    pub fn custom_prompt_signature_description(&self) -> Option<&str> {
        self.custom_prompt_signature_description.as_deref()
    }

    pub fn fewshot_examples(&self) -> &[FieldValues] {
        &self.fewshot_examples
    }

    pub fn include_meta(&self) -> bool {
        self.include_meta
    }

    /// Engine kinds this task's kind can run on with the built-in bridges.
    pub fn supported_engines(&self) -> Vec<EngineKind> {
        BridgeRegistry::builtin().supported_engines(self.kind())
    }

    /// Runs the task over `docs`, writing one result per document under the task id.
    #[instrument(skip_all, fields(task_id = %self.id, docs = docs.len()))]
    pub async fn run(&self, docs: &mut [Document]) -> Result<()> {
        let bridge = &self.bridge;
        let executable = self.engine.build_executable(
            bridge.inference_mode(),
            bridge.prompt_template(),
            bridge.prompt_signature(),
            &self.fewshot_examples,
        )?;

        let values = bridge.extract(docs);
        let (inputs, offsets) = fan_out(docs, values)?;
        let chunk_count = inputs.len();
        debug!(chunks = chunk_count, "Fanned out documents into chunks");

        let results = executable.execute(inputs).await?;
        if results.len() != chunk_count {
            return Err(SieveError::ContractViolation(format!(
                "engine returned {} results for {chunk_count} chunks",
                results.len()
            )));
        }

        let outputs = bridge.consolidate(&results, &offsets)?;
        if outputs.len() != docs.len() {
            return Err(SieveError::ContractViolation(format!(
                "consolidation produced {} results for {} documents",
                outputs.len(),
                docs.len()
            )));
        }

        if self.include_meta {
            for (doc, range) in docs.iter_mut().zip(&offsets) {
                let raw: Vec<Value> = results[range.clone()]
                    .iter()
                    .map(|r| r.clone().unwrap_or(Value::Null))
                    .collect();
                doc.meta.insert(self.id.clone(), Value::Array(raw));
            }
        }

        let absent = results.iter().filter(|r| r.is_none()).count();
        bridge.integrate(outputs, docs);

        info!(chunks = chunk_count, absent, "Task completed");
        Ok(())
    }

    /// Tabular view of this task's results. Fails with [`SieveError::MissingResult`] if any
    /// document lacks a result for the task.
    pub fn to_dataset(&self, docs: &[Document]) -> Result<Dataset> {
        match &self.spec {
            TaskSpec::Classification { .. } => classification::to_dataset(&self.id, docs),
            TaskSpec::InformationExtraction { .. } => {
                information_extraction::to_dataset(&self.id, docs)
            }
            TaskSpec::QuestionAnswering { .. } => question_answering::to_dataset(&self.id, docs),
            TaskSpec::Summarization { .. } => summarization::to_dataset(&self.id, docs),
            TaskSpec::Translation { .. } => translation::to_dataset(&self.id, docs),
        }
    }
}

impl fmt::Debug for PredictiveTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictiveTask")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("engine", &self.engine.kind())
            .field("include_meta", &self.include_meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldValues {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_fan_out_offsets_partition_chunks() {
        let docs = vec![
            Document::new("a b c").with_chunks(["a", "b", "c"]),
            Document::new("whole"),
            Document::new("d e").with_chunks(["d", "e"]),
        ];
        let values = vec![
            fields(json!({"text": "a b c", "max_n": 5})),
            fields(json!({"text": "whole", "max_n": 5})),
            fields(json!({"text": "d e", "max_n": 5})),
        ];
        let (inputs, offsets) = fan_out(&docs, values).unwrap();

        assert_eq!(offsets, vec![0..3, 3..4, 4..6]);
        assert_eq!(inputs.len(), 6);
        assert_eq!(inputs[1]["text"], "b");
        assert_eq!(inputs[3]["text"], "whole");
        assert_eq!(inputs[5]["max_n"], 5);

        let total: usize = offsets.iter().map(|r| r.len()).sum();
        assert_eq!(total, inputs.len());
        assert!(offsets.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn test_fan_out_missing_text() {
        let docs = vec![Document::new("ok"), Document::default()];
        let values = vec![FieldValues::new(), FieldValues::new()];
        assert!(matches!(
            fan_out(&docs, values),
            Err(SieveError::MissingText { index: 1 })
        ));
    }

    #[test]
    fn test_fan_out_value_count_mismatch() {
        let docs = vec![Document::new("ok")];
        assert!(matches!(
            fan_out(&docs, Vec::new()),
            Err(SieveError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_task_spec_serialization() {
        let spec = TaskSpec::Summarization { max_n: 30 };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, json!({"kind": "summarization", "max_n": 30}));
        assert_eq!(spec.kind().as_str(), "Summarization");
    }

    #[test]
    fn test_example_fields_requires_object() {
        assert!(matches!(
            example_fields(&"just a string"),
            Err(SieveError::InvalidFewshot(_))
        ));
    }
}
