pub mod anthropic;
pub mod backend;
mod batch;
pub mod chat;
pub mod constrained;
pub mod reasoning;
pub mod tagger;
pub mod zero_shot;

pub use anthropic::AnthropicClient;
pub use backend::{
    BackendSet, ChatBackend, ChatRequest, ConstrainedBackend, TaggerBackend, ZeroShotBackend,
    ZeroShotPrediction,
};
pub use chat::ChatEngine;
pub use constrained::ConstrainedEngine;
pub use reasoning::ReasoningEngine;
pub use tagger::TaggerEngine;
pub use zero_shot::ZeroShotEngine;
