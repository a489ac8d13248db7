//! Deterministic in-process backends shared by the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use sieve_core::output::{LabelScore, Span};
use sieve_core::signature::{FieldKind, OutputSchema};
use sieve_core::{Document, Result};
use sieve_engines::{
    ChatBackend, ChatRequest, ConstrainedBackend, TaggerBackend, ZeroShotBackend,
    ZeroShotPrediction,
};

/// The chunk text a default template rendered, taken from its last `Text: ` line.
pub fn chunk_text(prompt: &str) -> &str {
    prompt
        .rsplit_once("Text: ")
        .map(|(_, rest)| rest.lines().next().unwrap_or_default())
        .unwrap_or_default()
}

/// Answers every schema the default bridges ask for from the chunk text alone:
/// label fields score 1.0 when the text mentions the label, text fields echo the chunk
/// upper-cased, entity lists hold every capitalized word as a `Person`.
pub struct KeywordConstrained {
    pub name: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl KeywordConstrained {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_answer(text: &str, schema: &OutputSchema) -> Value {
    let mut out = Map::new();
    for field in &schema.fields {
        let value = match (&field.kind, field.name.as_str()) {
            (FieldKind::Float, label) => json!(if text.contains(label) { 1.0 } else { 0.0 }),
            (FieldKind::String, "reasoning") => json!(format!("saw {text}")),
            (FieldKind::String, _) => json!(text.to_uppercase()),
            (FieldKind::List { .. }, "entities") => Value::from(
                text.split_whitespace()
                    .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
                    .map(|w| json!({ "name": w }))
                    .collect::<Vec<_>>(),
            ),
            (FieldKind::List { .. }, _) => json!([text]),
            _ => Value::Null,
        };
        out.insert(field.name.clone(), value);
    }
    Value::Object(out)
}

#[async_trait]
impl ConstrainedBackend for KeywordConstrained {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, schema: &OutputSchema) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(keyword_answer(chunk_text(prompt), schema))
    }
}

/// Chat backend replying with a fixed string and recording every request.
pub struct CannedChat {
    pub reply: String,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl CannedChat {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatBackend for CannedChat {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

/// Scores each label by how often it occurs in the text, capped at 1.
pub struct CountingZeroShot {
    pub calls: AtomicUsize,
}

impl CountingZeroShot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ZeroShotBackend for CountingZeroShot {
    fn name(&self) -> &str {
        "counting-nli"
    }

    async fn classify(
        &self,
        texts: &[String],
        labels: &[String],
        _hypothesis_template: &str,
        _multi_label: bool,
    ) -> Result<Vec<ZeroShotPrediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| ZeroShotPrediction {
                // Reverse order, as NLI pipelines sort by score.
                labels: labels.iter().rev().cloned().collect(),
                scores: labels
                    .iter()
                    .rev()
                    .map(|l| (text.matches(l.as_str()).count() as f64 / 2.0).min(1.0))
                    .collect(),
            })
            .collect())
    }
}

/// Answers every question with each word of the text, scored by word length.
pub struct WordTagger;

#[async_trait]
impl TaggerBackend for WordTagger {
    fn name(&self) -> &str {
        "word-tagger"
    }

    async fn classify(
        &self,
        texts: &[String],
        labels: &[String],
        threshold: f64,
    ) -> Result<Vec<Vec<LabelScore>>> {
        Ok(texts
            .iter()
            .map(|text| {
                labels
                    .iter()
                    .filter(|l| text.contains(l.as_str()))
                    .map(|l| LabelScore::new(l.as_str(), 0.9))
                    .filter(|s| s.score >= threshold)
                    .collect()
            })
            .collect())
    }

    async fn answer(
        &self,
        texts: &[String],
        questions: &[String],
        _threshold: f64,
    ) -> Result<Vec<Vec<Span>>> {
        Ok(texts
            .iter()
            .map(|text| {
                questions
                    .iter()
                    .flat_map(|q| {
                        text.split_whitespace().map(move |word| Span {
                            label: q.clone(),
                            text: word.to_string(),
                            score: word.len() as f64 / 10.0,
                            start: None,
                            end: None,
                        })
                    })
                    .collect()
            })
            .collect())
    }
}

pub fn docs(texts: &[&str]) -> Vec<Document> {
    texts.iter().map(|t| Document::new(*t)).collect()
}
