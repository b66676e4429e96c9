use std::sync::Arc;

use tracing::info;

use crate::application::{LlmSemanticParser, QueryPipeline, SemanticParser};
use crate::infrastructure::config::{AppConfig, ConfigService};
use crate::infrastructure::llm_clients::{LLMClient, RouterClient};
use crate::interfaces::http::HttpState;

/// Wire the pipeline and its optional fallback parser from configuration
pub fn setup(config: &AppConfig) -> HttpState {
    let config_service = ConfigService::new();

    let parser: Option<Arc<dyn SemanticParser>> =
        config_service.llm_config(&config.llm).map(|llm| {
            info!(
                provider = ?llm.provider,
                model = %llm.model,
                base_url = %llm.base_url,
                "Fallback parser enabled"
            );
            let client: Arc<dyn LLMClient> = Arc::new(RouterClient::new());
            Arc::new(LlmSemanticParser::new(client, llm)) as Arc<dyn SemanticParser>
        });

    if parser.is_none() {
        info!("Fallback parser disabled; unmatched queries fall back to preview");
    }

    let pipeline = Arc::new(QueryPipeline::new(config.pipeline.clone(), parser));
    HttpState::new(pipeline)
}
