//! Contracts for the inference backends engines wrap, and a registry used to inject them
//! when restoring engines from snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sieve_core::engine::{Engine, EngineConfig, EngineResolver};
use sieve_core::error::{Result, SieveError};
use sieve_core::output::{LabelScore, Span};
use sieve_core::signature::OutputSchema;

use crate::chat::ChatEngine;
use crate::constrained::ConstrainedEngine;
use crate::reasoning::ReasoningEngine;
use crate::tagger::TaggerEngine;
use crate::zero_shot::ZeroShotEngine;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub prompt: String,
}

/// Free-text chat completion.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Generation constrained to produce a JSON value conforming to `schema`.
#[async_trait]
pub trait ConstrainedBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str, schema: &OutputSchema) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotPrediction {
    pub labels: Vec<String>,
    pub scores: Vec<f64>,
}

/// NLI-style zero-shot classifier. Returns one prediction per text.
#[async_trait]
pub trait ZeroShotBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(
        &self,
        texts: &[String],
        labels: &[String],
        hypothesis_template: &str,
        multi_label: bool,
    ) -> Result<Vec<ZeroShotPrediction>>;
}

/// Label and span tagger. Both calls return one entry per text.
#[async_trait]
pub trait TaggerBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn classify(
        &self,
        texts: &[String],
        labels: &[String],
        threshold: f64,
    ) -> Result<Vec<Vec<LabelScore>>>;
    async fn answer(
        &self,
        texts: &[String],
        questions: &[String],
        threshold: f64,
    ) -> Result<Vec<Vec<Span>>>;
}

/// Backends available for restoring engines, keyed by backend name.
#[derive(Clone, Default)]
pub struct BackendSet {
    chat: HashMap<String, Arc<dyn ChatBackend>>,
    constrained: HashMap<String, Arc<dyn ConstrainedBackend>>,
    zero_shot: HashMap<String, Arc<dyn ZeroShotBackend>>,
    tagger: HashMap<String, Arc<dyn TaggerBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.chat.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with_constrained(mut self, backend: Arc<dyn ConstrainedBackend>) -> Self {
        self.constrained.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with_zero_shot(mut self, backend: Arc<dyn ZeroShotBackend>) -> Self {
        self.zero_shot.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with_tagger(mut self, backend: Arc<dyn TaggerBackend>) -> Self {
        self.tagger.insert(backend.name().to_string(), backend);
        self
    }
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    name: &str,
    config: &EngineConfig,
) -> Result<Arc<T>> {
    map.get(name).cloned().ok_or_else(|| {
        SieveError::Config(format!(
            "no backend named '{name}' was supplied for {} engine",
            config.kind()
        ))
    })
}

impl EngineResolver for BackendSet {
    fn resolve(&self, config: &EngineConfig) -> Result<Arc<dyn Engine>> {
        let name = config.backend();
        let settings = config.settings().clone();

        let engine: Arc<dyn Engine> = match config {
            EngineConfig::Chat { .. } => Arc::new(
                ChatEngine::new(lookup(&self.chat, name, config)?).with_settings(settings),
            ),
            EngineConfig::Constrained { .. } => Arc::new(
                ConstrainedEngine::new(lookup(&self.constrained, name, config)?)
                    .with_settings(settings),
            ),
            EngineConfig::Reasoning { .. } => Arc::new(
                ReasoningEngine::new(lookup(&self.chat, name, config)?).with_settings(settings),
            ),
            EngineConfig::ZeroShot { multi_label, .. } => Arc::new(
                ZeroShotEngine::new(lookup(&self.zero_shot, name, config)?)
                    .with_settings(settings)
                    .with_multi_label(*multi_label),
            ),
            EngineConfig::Tagger { threshold, .. } => Arc::new(
                TaggerEngine::new(lookup(&self.tagger, name, config)?)
                    .with_settings(settings)
                    .with_threshold(*threshold),
            ),
        };

        tracing::debug!(kind = %config.kind(), backend = name, "Restored engine from snapshot");
        Ok(engine)
    }
}
