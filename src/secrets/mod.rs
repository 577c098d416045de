//! Secret retrieval.
//!
//! Values are read once at pipeline start, held in process memory, and
//! treated as opaque. Keys use a `namespace/name` convention, e.g.
//! `alpaca/api_key` or `polygon/api_key`.

use crate::error::EngineError;

pub trait Secrets: Send + Sync {
    fn get(&self, key: &str) -> Result<String, EngineError>;
}

/// Environment-backed provider: `alpaca/api_key` maps to
/// `WL_ALPACA_API_KEY`.
pub struct EnvSecrets;

impl EnvSecrets {
    fn env_var(key: &str) -> String {
        format!("WL_{}", key.replace('/', "_").to_uppercase())
    }
}

impl Secrets for EnvSecrets {
    fn get(&self, key: &str) -> Result<String, EngineError> {
        let var = Self::env_var(key);
        std::env::var(&var)
            .map_err(|_| EngineError::Config(format!("missing secret {key} (env {var})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mapping() {
        assert_eq!(EnvSecrets::env_var("alpaca/api_key"), "WL_ALPACA_API_KEY");
        assert_eq!(EnvSecrets::env_var("polygon/api_key"), "WL_POLYGON_API_KEY");
    }

    #[test]
    fn present_and_missing_keys() {
        std::env::set_var("WL_TEST_TOKEN", "s3cret");
        assert_eq!(EnvSecrets.get("test/token").unwrap(), "s3cret");
        let err = EnvSecrets.get("test/absent").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        std::env::remove_var("WL_TEST_TOKEN");
    }
}
