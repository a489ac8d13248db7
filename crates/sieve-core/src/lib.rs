pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod output;
pub mod signature;
pub mod template;

pub use config::{AnthropicSettings, GenerationSettings, SettingsOverride, SieveConfig};
pub use document::Document;
pub use engine::{
    ChunkResult, Engine, EngineConfig, EngineKind, EngineResolver, Executable, FieldValues,
    InferenceMode,
};
pub use error::{Result, SieveError};
pub use output::{Answer, Classification, LabelScore, Span, TaskOutput};
pub use signature::{DeclarativeSignature, FieldKind, FieldSpec, OutputSchema, PromptSignature};
pub use template::Template;
