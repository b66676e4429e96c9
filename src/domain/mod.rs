pub mod dataset;
pub mod error;
pub mod execution;
pub mod history;
pub mod llm_config;
pub mod operation;
pub mod parse_result;
pub mod pipeline_config;
pub mod profile;
pub mod value;
