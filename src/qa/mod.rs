//! Question answering: position gate, retrieval, context assembly,
//! streaming answer generation, and citation resolution.

pub mod answer;
pub mod citation;
pub mod context;
pub mod gate;
pub mod retriever;

pub use answer::{AnswerEvent, AnswerJob, StreamingAnswerer, NO_CONTENT_ANSWER};
pub use context::{AssembledContext, ContextAssembler, ContextBindings};
pub use gate::PositionGate;
pub use retriever::{RankedChunk, Retriever};
