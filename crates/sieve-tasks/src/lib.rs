pub mod bridge;
pub mod classification;
pub mod dataset;
pub mod information_extraction;
pub mod pipeline;
pub mod question_answering;
pub mod serialization;
pub mod summarization;
pub mod task;
pub mod translation;

pub use bridge::{Bridge, BridgeBase, BridgeContext, BridgeFactory, BridgeRegistry};
pub use dataset::Dataset;
pub use pipeline::{Pipeline, Task};
pub use serialization::{PipelineConfig, TaskConfig};
pub use task::{PredictiveTask, PredictiveTaskBuilder, TaskKind, TaskSpec};
