pub mod use_cases;

pub use use_cases::query_pipeline::{ExecutionOutcome, QueryAnswer, QueryPipeline};
pub use use_cases::semantic_parser::{LlmSemanticParser, SemanticParser};
pub use use_cases::session::Session;
