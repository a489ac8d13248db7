use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::output::TaskOutput;

/// A unit of text flowing through a pipeline. Tasks write their results into `results`
/// under their task id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub text: Option<String>,
    /// Spans produced by an external chunking step. `None` or empty means the whole text is
    /// processed as a single chunk.
    #[serde(default)]
    pub chunks: Option<Vec<String>>,
    #[serde(default)]
    pub results: HashMap<String, TaskOutput>,
    /// Raw per-chunk engine output, only populated for tasks with `include_meta`.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Chunks the document is processed as: the precomputed chunks, or the full text.
    /// Returns `None` if the document has neither.
    pub fn effective_chunks(&self) -> Option<Vec<&str>> {
        match &self.chunks {
            Some(chunks) if !chunks.is_empty() => {
                Some(chunks.iter().map(String::as_str).collect())
            }
            _ => self.text.as_deref().map(|text| vec![text]),
        }
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskOutput> {
        self.results.get(task_id)
    }
}
