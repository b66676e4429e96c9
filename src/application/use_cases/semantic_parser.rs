//! Fallback Semantic Parser
//!
//! Used only when rule matching is inconclusive. The query and a schema summary go into a
//! fixed prompt; the model reply is cleaned, decoded strictly into a `StructuredOperation`
//! and validated against the profile. Anything that does not decode and validate is an
//! `InvalidOperation`; no repair is attempted.

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::operation::StructuredOperation;
use crate::domain::profile::SchemaProfile;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::{clean_llm_response, extract_json_payload};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Capability: free text plus schema → one structured operation
#[async_trait]
pub trait SemanticParser: Send + Sync {
    async fn parse(&self, query: &str, profile: &SchemaProfile) -> Result<StructuredOperation>;
}

/// Build the system prompt for the parser
fn build_system_prompt(schema_summary: &str) -> String {
    format!(
        r#"You translate questions about a single table into a JSON operation plan.

TABLE COLUMNS (name, kind, examples):
{schema}

OPERATION FORMAT:
{{
  "steps": [ <step>, ... ],
  "limit": <optional positive integer>
}}

STEP KINDS:
- {{"kind": "filter", "column": "<col>", "comparator": "eq|ne|gt|lt|ge|le|contains", "value": <number or string>, "grain": <optional "day|week|month|quarter|year">}}
- {{"kind": "sort", "keys": [{{"column": "<col>", "direction": "asc|desc"}}]}}
- {{"kind": "group_aggregate", "group_by": [{{"column": "<col>", "grain": <optional grain>}}], "metric": "<numeric col>", "aggregate": "sum|mean|count|min|max"}}
- {{"kind": "pivot", "rows": {{"column": "<col>"}}, "columns": {{"column": "<col>"}}, "values": "<numeric col>", "aggregate": "sum|mean|count|min|max"}}
- {{"kind": "preview", "rows": <positive integer>}}

RULES:
1. Use ONLY the column names listed above, spelled exactly.
2. At most one group_aggregate or pivot step, at most one sort step.
3. preview must be the only step when used.
4. After a group_aggregate, sort by the metric column or a group column.
5. If the question cannot be answered from these columns, return {{"steps": [{{"kind": "preview", "rows": 100}}]}}.

Respond with the JSON object only, no explanation."#,
        schema = schema_summary
    )
}

/// Decode a model reply into a validated operation
pub fn decode_operation(raw: &str, profile: &SchemaProfile) -> Result<StructuredOperation> {
    let cleaned = clean_llm_response(raw);
    let payload = extract_json_payload(&cleaned);

    let operation: StructuredOperation = serde_json::from_str(&payload).map_err(|e| {
        AppError::InvalidOperation(format!("model output is not a valid operation: {}", e))
    })?;

    operation.validate_against(profile).map_err(|e| match e {
        AppError::StaleOperation(message) => AppError::InvalidOperation(message),
        other => other,
    })?;

    Ok(operation)
}

/// Production parser backed by an LLM client
pub struct LlmSemanticParser {
    client: Arc<dyn LLMClient>,
    config: LLMConfig,
}

impl LlmSemanticParser {
    pub fn new(client: Arc<dyn LLMClient>, config: LLMConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SemanticParser for LlmSemanticParser {
    async fn parse(&self, query: &str, profile: &SchemaProfile) -> Result<StructuredOperation> {
        let system = build_system_prompt(&profile.summary());
        debug!(model = %self.config.model, query = %query, "Calling fallback parser");

        let reply = self.client.generate(&self.config, &system, query).await?;
        decode_operation(&reply, profile).map_err(|e| {
            warn!(error = %e, "Fallback parser output rejected");
            e
        })
    }
}
