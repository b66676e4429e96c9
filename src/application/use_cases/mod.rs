pub mod ambiguity_resolver;
pub mod column_resolver;
pub mod explanation;
pub mod intent_matcher;
pub mod operation_executor;
pub mod profile_cache;
pub mod query_pipeline;
pub mod schema_profiler;
pub mod semantic_parser;
pub mod session;
