//! Bridges translate one task's vocabulary (labels, questions, entity schema, target language,
//! length budget) into one engine kind's prompts, signatures and result shapes, and reduce the
//! engine's per-chunk results back to per-document task outputs.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use serde_json::Value;

use sieve_core::document::Document;
use sieve_core::engine::{ChunkResult, EngineKind, FieldValues, InferenceMode};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::TaskOutput;
use sieve_core::signature::PromptSignature;

use crate::task::{TaskKind, TaskSpec};
use crate::{classification, information_extraction, question_answering, summarization, translation};

pub trait Bridge: Send + Sync {
    fn task_id(&self) -> &str;

    /// Effective prompt template: the custom override if one was given, else the bridge
    /// default. `None` for engines that build their own prompts.
    fn prompt_template(&self) -> Option<&str>;

    fn prompt_signature_description(&self) -> Option<&str>;

    /// Built once when the bridge is constructed.
    fn prompt_signature(&self) -> &PromptSignature;

    fn inference_mode(&self) -> InferenceMode;

    /// Values to render into prompts, one map per document.
    fn extract(&self, docs: &[Document]) -> Vec<FieldValues> {
        docs.iter().map(text_fields).collect()
    }

    /// Reduces chunk results to one output per document. `offsets[i]` selects document
    /// `i`'s chunk results.
    fn consolidate(&self, results: &[ChunkResult], offsets: &[Range<usize>]) -> Result<Vec<TaskOutput>>;

    fn integrate(&self, results: Vec<TaskOutput>, docs: &mut [Document]) {
        for (doc, result) in docs.iter_mut().zip(results) {
            doc.results.insert(self.task_id().to_string(), result);
        }
    }
}

/// State every bridge carries besides its task parameters.
#[derive(Debug, Clone)]
pub struct BridgeBase {
    pub task_id: String,
    pub prompt_template: Option<String>,
    pub prompt_signature_description: Option<String>,
    pub mode: InferenceMode,
}

impl BridgeBase {
    pub fn new(
        ctx: &BridgeContext<'_>,
        mode: InferenceMode,
        default_template: Option<String>,
        default_description: Option<&str>,
    ) -> Self {
        Self {
            task_id: ctx.task_id.to_string(),
            prompt_template: ctx.prompt_template.map(str::to_string).or(default_template),
            prompt_signature_description: ctx
                .prompt_signature_description
                .or(default_description)
                .map(str::to_string),
            mode,
        }
    }
}

/// Everything a bridge factory gets to build a bridge from.
#[derive(Debug, Clone, Copy)]
pub struct BridgeContext<'a> {
    pub task_id: &'a str,
    pub spec: &'a TaskSpec,
    pub prompt_template: Option<&'a str>,
    pub prompt_signature_description: Option<&'a str>,
}

impl BridgeContext<'_> {
    pub(crate) fn mismatch(&self, expected: TaskKind) -> SieveError {
        SieveError::Config(format!(
            "bridge for {expected} was given a {} task",
            self.spec.kind()
        ))
    }
}

pub type BridgeFactory = fn(&BridgeContext<'_>) -> Result<Box<dyn Bridge>>;

pub(crate) fn boxed<B: Bridge + 'static>(bridge: B) -> Box<dyn Bridge> {
    Box::new(bridge)
}

/// Maps (task kind, engine kind) pairs to bridge factories.
#[derive(Default, Clone)]
pub struct BridgeRegistry {
    factories: HashMap<(TaskKind, EngineKind), BridgeFactory>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bridges for every built-in task.
    pub fn builtin() -> &'static BridgeRegistry {
        static BUILTIN: OnceLock<BridgeRegistry> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            let mut registry = BridgeRegistry::new();
            classification::register(&mut registry);
            information_extraction::register(&mut registry);
            question_answering::register(&mut registry);
            summarization::register(&mut registry);
            translation::register(&mut registry);
            registry
        })
    }

    pub fn register(&mut self, task: TaskKind, engine: EngineKind, factory: BridgeFactory) {
        if self.factories.insert((task, engine), factory).is_some() {
            tracing::debug!(task = %task, engine = %engine, "Replaced bridge factory");
        }
    }

    pub fn create(&self, engine: EngineKind, ctx: &BridgeContext<'_>) -> Result<Box<dyn Bridge>> {
        let factory = self
            .factories
            .get(&(ctx.spec.kind(), engine))
            .ok_or_else(|| SieveError::UnsupportedEngine {
                task: ctx.task_id.to_string(),
                engine,
            })?;
        factory(ctx)
    }

    pub fn supports(&self, task: TaskKind, engine: EngineKind) -> bool {
        self.factories.contains_key(&(task, engine))
    }

    /// Engine kinds with a bridge for `task`, in [`EngineKind::ALL`] order.
    pub fn supported_engines(&self, task: TaskKind) -> Vec<EngineKind> {
        EngineKind::ALL
            .into_iter()
            .filter(|engine| self.supports(task, *engine))
            .collect()
    }
}

pub(crate) fn text_fields(doc: &Document) -> FieldValues {
    let mut fields = FieldValues::new();
    let text = doc.text.clone().map(Value::String).unwrap_or(Value::Null);
    fields.insert("text".to_string(), text);
    fields
}

/// Splits `results` into per-document slices, checking that every range is in bounds.
pub fn doc_slices<'a>(
    results: &'a [ChunkResult],
    offsets: &[Range<usize>],
) -> Result<Vec<&'a [ChunkResult]>> {
    offsets
        .iter()
        .map(|range| {
            results.get(range.clone()).ok_or_else(|| {
                SieveError::ContractViolation(format!(
                    "chunk range {range:?} is out of bounds for {} results",
                    results.len()
                ))
            })
        })
        .collect()
}

/// Consolidation shared by tasks whose output is one free text per chunk (summaries,
/// translations): present chunk texts joined with newlines, absent ones skipped.
pub(crate) fn join_chunk_texts(
    results: &[ChunkResult],
    offsets: &[Range<usize>],
    field: &str,
) -> Result<Vec<TaskOutput>> {
    let outputs = doc_slices(results, offsets)?
        .into_iter()
        .map(|slice| {
            let parts: Vec<&str> = slice
                .iter()
                .flatten()
                .filter_map(|value| value.get(field).and_then(Value::as_str))
                .collect();
            TaskOutput::Text(parts.join("\n"))
        })
        .collect();
    Ok(outputs)
}

/// Collects the `reasoning` strings of the present chunk results into a JSON array string.
pub(crate) fn collect_reasoning(slice: &[ChunkResult]) -> String {
    let reasonings: Vec<&str> = slice
        .iter()
        .flatten()
        .filter_map(|value| value.get("reasoning").and_then(Value::as_str))
        .collect();
    Value::from(reasonings).to_string()
}
