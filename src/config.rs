use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub web: WebConfig,
    // Populated from the .env file, everything else from config/default.toml.
    pub database_path: String,
    pub media_path: String,
    pub allowed_origins: String,
    pub log_level: String,
    pub session_secret_key: String,
    pub admin_url_prefix: String,
    pub use_secure_cookies: bool,
}

fn required_var(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| {
        config::ConfigError::Message(format!("FATAL: Environment variable '{}' is not set in your .env file.", name))
    })
}

fn require_absolute(name: &str, value: &str) -> Result<(), config::ConfigError> {
    if Path::new(value).is_relative() {
        return Err(config::ConfigError::Message(format!(
            "FATAL: The '{}' in your .env file is a relative path ('{}'). It MUST be an absolute path.",
            name, value
        )));
    }
    Ok(())
}

/// The session key must be 128 hex characters (64 bytes).
pub fn validate_session_key(key: &str) -> Result<(), config::ConfigError> {
    if key.len() != 128 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(config::ConfigError::Message(
            "FATAL: 'SESSION_SECRET_KEY' must be 128 hexadecimal characters long (64 bytes).".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_admin_prefix(prefix: &str) -> Result<(), config::ConfigError> {
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(config::ConfigError::Message(
            "FATAL: 'ADMIN_URL_PREFIX' must not be empty and can only contain letters, numbers, underscores, and hyphens."
                .to_string(),
        ));
    }
    Ok(())
}

impl Config {
    pub fn from_env(env_path: &Path) -> Result<Self, config::ConfigError> {
        dotenvy::from_path(env_path).map_err(|e| {
            config::ConfigError::Message(format!(
                "FATAL: Failed to load .env file from '{}'. Error: {}",
                env_path.display(),
                e
            ))
        })?;

        let database_path = required_var("DATABASE_PATH")?;
        let media_path = required_var("MEDIA_PATH")?;
        require_absolute("DATABASE_PATH", &database_path)?;
        require_absolute("MEDIA_PATH", &media_path)?;

        let session_secret_key = required_var("SESSION_SECRET_KEY")?;
        validate_session_key(&session_secret_key)?;

        let admin_url_prefix = required_var("ADMIN_URL_PREFIX")?;
        validate_admin_prefix(&admin_url_prefix)?;

        let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let use_secure_cookies = env::var("USE_SECURE_COOKIES")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        config::Config::builder()
            .add_source(config::File::new("config/default.toml", config::FileFormat::Toml))
            .set_override("database_path", database_path)?
            .set_override("media_path", media_path)?
            .set_override("session_secret_key", session_secret_key)?
            .set_override("allowed_origins", allowed_origins)?
            .set_override("log_level", log_level)?
            .set_override("use_secure_cookies", use_secure_cookies)?
            .set_override("admin_url_prefix", admin_url_prefix)?
            .build()?
            .try_deserialize()
    }

    /// SQLite file holding accounts, settings and all site content.
    pub fn content_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("desa").join("desa.db")
    }

    /// redb file holding the activity log.
    pub fn activity_db_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path).join("activity").join("activity.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_must_be_128_hex_chars() {
        assert!(validate_session_key(&"ab".repeat(64)).is_ok());
        assert!(validate_session_key(&"ab".repeat(32)).is_err());
        assert!(validate_session_key(&"zz".repeat(64)).is_err());
    }

    #[test]
    fn admin_prefix_rejects_path_characters() {
        assert!(validate_admin_prefix("panel-desa_1").is_ok());
        assert!(validate_admin_prefix("").is_err());
        assert!(validate_admin_prefix("panel/desa").is_err());
        assert!(validate_admin_prefix("panel desa").is_err());
    }

    #[test]
    fn database_files_live_in_their_own_folders() {
        let config = Config {
            web: WebConfig { host: "127.0.0.1".to_string(), port: 8080 },
            database_path: "/srv/data".to_string(),
            media_path: "/srv/media".to_string(),
            allowed_origins: String::new(),
            log_level: "info".to_string(),
            session_secret_key: String::new(),
            admin_url_prefix: "panel".to_string(),
            use_secure_cookies: false,
        };
        assert_eq!(config.content_db_path(), PathBuf::from("/srv/data/desa/desa.db"));
        assert_eq!(config.activity_db_path(), PathBuf::from("/srv/data/activity/activity.db"));
    }
}
