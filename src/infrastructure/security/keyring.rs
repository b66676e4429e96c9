use crate::domain::error::{AppError, Result};
use keyring::Entry;

/// API keys for model providers, stored in the OS credential store
pub struct KeyringManager {
    service: String,
}

impl KeyringManager {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry> {
        Entry::new(&self.service, account).map_err(|e| {
            AppError::SecurityError(format!("Keyring entry '{}' unavailable: {}", account, e))
        })
    }

    pub fn get_secret(&self, account: &str) -> Result<String> {
        self.entry(account)?.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => AppError::NotFound(format!("No stored key for '{}'", account)),
            other => AppError::SecurityError(format!("Failed to read key for '{}': {}", account, other)),
        })
    }
}
