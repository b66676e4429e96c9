use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use crate::domain::pipeline_config::PipelineConfig;
use crate::infrastructure::security::keyring::KeyringManager;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use validator::Validate;

pub const CONFIG_FILE: &str = "data-explorer.toml";
pub const ENV_PREFIX: &str = "DATA_EXPLORER_";
const KEYRING_SERVICE: &str = "DataExplorer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

/// Fallback model settings; the fallback parser is skipped unless `enabled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub provider: LLMProvider,
    #[validate(length(min = 1))]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub model: String,
    /// Falls back to the OS keyring when unset
    pub api_key: Option<String>,
    #[validate(range(min = 1))]
    pub max_tokens: Option<u32>,
    #[validate(range(min = 0.0, max = 2.0))]
    pub temperature: Option<f32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        let llm = LLMConfig::default();
        Self {
            enabled: false,
            provider: llm.provider,
            base_url: llm.base_url,
            model: llm.model,
            api_key: None,
            max_tokens: Some(512),
            temperature: llm.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub llm: LlmSettings,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Defaults, then `data-explorer.toml`, then `DATA_EXPLORER_*` variables (`__` nests)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_figment(Self::figment(Path::new(CONFIG_FILE)))
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| AppError::ValidationError(format!("Failed to load configuration: {}", e)))?;

        config
            .validate()
            .map_err(|e| AppError::ValidationError(format!("Invalid configuration: {}", e)))?;

        if config.pipeline.max_suggestions == 0 || config.pipeline.preview_rows == 0 {
            return Err(AppError::ValidationError(
                "pipeline.max_suggestions and pipeline.preview_rows must be positive".to_string(),
            ));
        }

        info!(
            host = %config.server.host,
            port = config.server.port,
            fallback = config.llm.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn provider_key(provider: &LLMProvider) -> &'static str {
    match provider {
        LLMProvider::Local => "local",
        LLMProvider::OpenAI => "openai",
        LLMProvider::OpenRouter => "openrouter",
        LLMProvider::Google => "google",
    }
}

pub struct ConfigService {
    keyring: KeyringManager,
}

impl ConfigService {
    pub fn new() -> Self {
        Self {
            keyring: KeyringManager::new(KEYRING_SERVICE),
        }
    }

    pub fn get_api_key(&self, provider: &LLMProvider) -> Result<String> {
        self.keyring.get_secret(provider_key(provider))
    }

    /// Model settings for the fallback parser, or `None` when it is disabled
    pub fn llm_config(&self, settings: &LlmSettings) -> Option<LLMConfig> {
        if !settings.enabled {
            return None;
        }

        let api_key = settings.api_key.clone().or_else(|| {
            if settings.provider == LLMProvider::Local {
                return None;
            }
            match self.get_api_key(&settings.provider) {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!(provider = provider_key(&settings.provider), error = %e, "No API key in keyring");
                    None
                }
            }
        });

        Some(LLMConfig {
            provider: settings.provider.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_sources() {
        let config = AppConfig::from_figment(Figment::from(Serialized::defaults(AppConfig::default())))
            .unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.pipeline.preview_rows, 100);
        assert!(!config.llm.enabled);
        assert!(ConfigService::new().llm_config(&config.llm).is_none());
    }

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "explorer.toml",
                r#"
                [server]
                port = 8080

                [pipeline]
                default_top_n = 10
                preview_rows = 50

                [llm]
                enabled = true
                model = "qwen2.5-7b"
                "#,
            )?;
            jail.set_env("DATA_EXPLORER_PIPELINE__PREVIEW_ROWS", "25");

            let config = AppConfig::from_figment(AppConfig::figment(Path::new("explorer.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.server.host, "127.0.0.1");
            assert_eq!(config.pipeline.default_top_n, 10);
            assert_eq!(config.pipeline.preview_rows, 25);

            let llm = ConfigService::new().llm_config(&config.llm).unwrap();
            assert_eq!(llm.model, "qwen2.5-7b");
            assert_eq!(llm.provider, LLMProvider::Local);
            assert!(llm.api_key.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Serialized::default("llm.model", ""));
        assert!(matches!(
            AppConfig::from_figment(figment),
            Err(AppError::ValidationError(_))
        ));
    }
}
