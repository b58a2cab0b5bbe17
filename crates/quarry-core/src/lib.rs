//! Retrieval, context assembly, answer generation and the pipeline that ties them together.

pub mod assembler;
pub mod config;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod retriever;

pub use assembler::{AssembledContext, ContextAssembler};
pub use config::Config;
pub use error::RagError;
pub use generator::{Answer, Generator};
pub use pipeline::{AnswerResult, CollectionInfo, IngestReport, RagPipeline, open_store};
pub use retriever::{RetrievalResult, Retriever};
