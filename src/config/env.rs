//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use crate::logging::LogFormat;
use std::path::Path;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "PROBER_";

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env from the working directory if it exists. Returns whether a file was loaded.
    pub fn load_env_file() -> Result<bool> {
        Self::load_env_file_from(Path::new(".env"))
    }

    /// Load a specific env file into the process environment
    pub fn load_env_file_from(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }

        dotenv::from_path(path)
            .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;
        Ok(true)
    }

    /// Names of the `PROBER_*` variables present in the environment, sorted
    pub fn overrides() -> Vec<String> {
        let mut keys: Vec<String> = std::env::vars()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(ENV_PREFIX) && key != "PROBER_CONFIG")
            .collect();
        keys.sort();
        keys
    }

    /// Check every `PROBER_*` variable before the configuration is built
    pub fn validate_overrides() -> Result<()> {
        for (key, value) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                Self::validate_env_var(&key, &value)?;
            }
        }
        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "PROBER_INTERVAL_SECONDS" | "PROBER_TIMEOUT_SECONDS" | "PROBER_PUBLIC_IP_INTERVAL_SECONDS" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if secs == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "PROBER_PORT" => {
                let port: u16 = value
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if port == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "PROBER_LISTEN_ADDRESS" => {
                value
                    .parse::<std::net::IpAddr>()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
            }
            "PROBER_LOG_FORMAT" => {
                value
                    .parse::<LogFormat>()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
            }
            "PROBER_PUBLIC_IP" | "PROBER_ENABLE_COLOR" | "PROBER_VERBOSE" | "PROBER_DEBUG" => {
                match value.to_lowercase().as_str() {
                    "true" | "false" | "1" | "0" | "yes" | "no" | "on" | "off" => {}
                    _ => {
                        return Err(AppError::config(format!(
                            "Invalid {} value '{}': must be true or false",
                            key, value
                        )))
                    }
                }
            }
            "PROBER_HISTOGRAM_BUCKETS" => {
                let buckets = value
                    .split(',')
                    .map(|bound| bound.trim().parse::<f64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                crate::models::config::validate_buckets(&buckets)?;
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_env_var_validation() {
        assert!(EnvManager::validate_env_var("PROBER_INTERVAL_SECONDS", "30").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_PORT", "9100").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_LISTEN_ADDRESS", "::").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_LOG_FORMAT", "json").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_PUBLIC_IP", "true").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_HISTOGRAM_BUCKETS", "0.1, 0.5, 1").is_ok());
        assert!(EnvManager::validate_env_var("PROBER_UNKNOWN", "anything").is_ok());

        assert!(EnvManager::validate_env_var("PROBER_INTERVAL_SECONDS", "0").is_err());
        assert!(EnvManager::validate_env_var("PROBER_TIMEOUT_SECONDS", "soon").is_err());
        assert!(EnvManager::validate_env_var("PROBER_PORT", "0").is_err());
        assert!(EnvManager::validate_env_var("PROBER_PORT", "65536").is_err());
        assert!(EnvManager::validate_env_var("PROBER_LISTEN_ADDRESS", "localhost").is_err());
        assert!(EnvManager::validate_env_var("PROBER_LOG_FORMAT", "xml").is_err());
        assert!(EnvManager::validate_env_var("PROBER_DEBUG", "maybe").is_err());
        assert!(EnvManager::validate_env_var("PROBER_HISTOGRAM_BUCKETS", "1,0.5").is_err());
    }

    #[test]
    fn test_missing_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = EnvManager::load_env_file_from(&dir.path().join(".env")).unwrap();
        assert!(!loaded);
    }

    #[test]
    fn test_load_env_file() {
        let _guard = crate::config::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "PROBER_ENV_FILE_TEST_MARKER=loaded").unwrap();

        assert!(EnvManager::load_env_file_from(file.path()).unwrap());
        assert_eq!(std::env::var("PROBER_ENV_FILE_TEST_MARKER").unwrap(), "loaded");
        std::env::remove_var("PROBER_ENV_FILE_TEST_MARKER");
    }
}
