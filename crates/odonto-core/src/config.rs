//! Layered configuration.
//!
//! Values are read from built-in defaults, then an optional YAML file, then
//! `ODONTO_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `ODONTO_SCHEDULING__BUFFER_MINUTES=20`).

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduling: SchedulingConfig,
    pub security: SecurityConfig,
    pub backup: BackupConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("odonto.sqlite"),
        }
    }
}

/// Booking grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Distance between offered slot starts
    pub slot_minutes: u32,
    /// Rest time required after every appointment
    pub buffer_minutes: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            buffer_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Failed logins before the account is locked
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
    /// Account that can never be deactivated or deleted
    pub primary_admin_email: String,
    /// Lifetime of activation and reset tokens
    pub token_ttl_hours: i64,
    pub generated_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 15,
            primary_admin_email: "admin@odontoapp.com".to_string(),
            token_ttl_hours: 24,
            generated_password_length: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backups"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Gemini API key; the chatbot answers with a fixed apology when unset
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Messages returned by the chat history
    pub history_limit: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: odonto_assistant::DEFAULT_MODEL.to_string(),
            base_url: odonto_assistant::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            history_limit: 10,
        }
    }
}

impl AssistantConfig {
    /// Connection settings, if an API key is configured.
    pub fn gemini_settings(&self) -> Option<odonto_assistant::GeminiSettings> {
        let key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        let mut settings = odonto_assistant::GeminiSettings::new(key.to_string());
        settings.model = self.model.clone();
        settings.base_url = self.base_url.clone();
        settings.timeout_secs = self.timeout_secs;
        Some(settings)
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("ODONTO_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load(None)?;

            assert_eq!(config.scheduling.slot_minutes, 30);
            assert_eq!(config.scheduling.buffer_minutes, 15);
            assert_eq!(config.security.max_failed_attempts, 5);
            assert_eq!(config.security.primary_admin_email, "admin@odontoapp.com");
            assert!(config.assistant.gemini_settings().is_none());

            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "odonto.yaml",
                r#"
database:
  path: /var/lib/odonto/clinic.sqlite
scheduling:
  buffer_minutes: 10
assistant:
  api_key: test-key
  model: gemini-pro
"#,
            )?;

            let config = Config::load(Some(Path::new("odonto.yaml")))?;

            assert_eq!(config.database.path, PathBuf::from("/var/lib/odonto/clinic.sqlite"));
            assert_eq!(config.scheduling.buffer_minutes, 10);
            assert_eq!(config.scheduling.slot_minutes, 30); // default

            let settings = config.assistant.gemini_settings().unwrap();
            assert_eq!(settings.api_key, "test-key");
            assert_eq!(settings.model, "gemini-pro");

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "odonto.yaml",
                r#"
security:
  lockout_minutes: 30
"#,
            )?;

            jail.set_env("ODONTO_SECURITY__LOCKOUT_MINUTES", "45");
            jail.set_env("ODONTO_BACKUP__DIR", "/tmp/backups");

            let config = Config::load(Some(Path::new("odonto.yaml")))?;

            // Env vars should override
            assert_eq!(config.security.lockout_minutes, 45);
            assert_eq!(config.backup.dir, PathBuf::from("/tmp/backups"));

            Ok(())
        });
    }

    #[test]
    fn test_blank_api_key_is_unconfigured() {
        let config = AssistantConfig {
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.gemini_settings().is_none());
    }
}
