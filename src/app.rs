use actix_web::web;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::infrastructure::config::AppConfig;

pub async fn run() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Configuration error");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let state = web::Data::new(crate::infrastructure::bootstrap::setup(&config));
    crate::interfaces::http::start_server(state, &config.server)?.await
}
