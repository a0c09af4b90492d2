pub mod grounding;
pub mod llm;
pub mod render;
pub mod retriever;

pub use grounding::{
    AnswerFailure, AnswerGroundingAssembler, AnswerModel, ConfidenceLevel, GroundedAnswer,
    GroundingConfig, GroundingPayload,
};
pub use llm::OllamaAnswerModel;
pub use retriever::{
    ContextRetriever, RetrievalConfig, RetrievalConfigError, RetrievalStrategy, RetrievedContext,
};
