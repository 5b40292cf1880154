// kintone-mirror/src/config/mod.rs
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// kintone's hard cap on records per request.
pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PRIMARY_KEY_FIELD: &str = "レコード番号";
pub const DEFAULT_ID_FIELD: &str = "$id";
const DEFAULT_TABLE_PREFIX: &str = "app_";
const DEFAULT_REGISTRY_TABLE: &str = "apps";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonKintoneConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSyncOptions {
    pub page_size: Option<u32>,
    pub primary_key_field: Option<String>,
    pub id_field: Option<String>,
    pub table_prefix: Option<String>,
    pub registry_table: Option<String>,
    pub failure_policy: Option<FailurePolicy>,
    pub change_log_path: Option<PathBuf>,
    pub progress: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_url: Option<String>,
    #[serde(default)]
    pub kintone: JsonKintoneConfig,
    #[serde(default)]
    pub sync: JsonSyncOptions,
}

// Application's internal configuration structs

/// What to do with the remaining applications once one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KintoneAuth {
    ApiToken(String),
    Password { login: String, password: String },
}

#[derive(Debug, Clone)]
pub struct KintoneConfig {
    pub base_url: Url,
    pub auth: KintoneAuth,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    pub primary_key_field: String,
    pub id_field: String,
    pub table_prefix: String,
    pub registry_table: String,
    pub failure_policy: FailurePolicy,
    pub change_log_path: Option<PathBuf>,
    pub progress: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            primary_key_field: DEFAULT_PRIMARY_KEY_FIELD.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            failure_policy: FailurePolicy::Abort,
            change_log_path: None,
            progress: true,
        }
    }
}

impl SyncConfig {
    /// Mirror table for an application: prefix plus the id zero-padded to ten digits.
    pub fn table_name(&self, app_id: u64) -> String {
        format!("{}{:010}", self.table_prefix, app_id)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub kintone: KintoneConfig,
    pub sync: SyncConfig,
}

/// Environment values that take precedence over config.json.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub database_url: Option<String>,
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            database_url: var("DATABASE_URL"),
            base_url: var("KINTONE_BASE_URL"),
            api_token: var("KINTONE_API_TOKEN"),
            login: var("KINTONE_LOGIN"),
            password: var("KINTONE_PASSWORD"),
        }
    }
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path, overrides: &EnvOverrides) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig =
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Self::from_raw(raw_json_config, overrides)
    }

    pub fn from_raw(raw: RawJsonConfig, overrides: &EnvOverrides) -> Result<Self> {
        let database_url = overrides
            .database_url
            .clone()
            .or(raw.database_url)
            .filter(|s| !s.trim().is_empty())
            .context("database_url must be set in config.json or DATABASE_URL")?;

        Ok(AppConfig {
            database_url,
            kintone: load_kintone_config(raw.kintone, overrides)?,
            sync: load_sync_config(raw.sync)?,
        })
    }
}

fn load_kintone_config(raw: JsonKintoneConfig, overrides: &EnvOverrides) -> Result<KintoneConfig> {
    let base_url_str = overrides
        .base_url
        .clone()
        .or(raw.base_url)
        .filter(|s| !s.trim().is_empty())
        .context("kintone.base_url must be set in config.json or KINTONE_BASE_URL")?;
    let base_url = Url::parse(base_url_str.trim())
        .with_context(|| format!("Invalid kintone.base_url: {}", base_url_str))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        anyhow::bail!("kintone.base_url must be an http(s) URL, got {}", base_url);
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let api_token = non_empty(overrides.api_token.clone().or(raw.api_token));
    let login = non_empty(overrides.login.clone().or(raw.login));
    let password = non_empty(overrides.password.clone().or(raw.password));

    let auth = match (api_token, login, password) {
        (Some(token), _, _) => KintoneAuth::ApiToken(token),
        (None, Some(login), Some(password)) => KintoneAuth::Password { login, password },
        _ => anyhow::bail!(
            "kintone credentials are missing: set kintone.api_token, or both kintone.login and kintone.password"
        ),
    };

    Ok(KintoneConfig {
        base_url,
        auth,
        timeout: Duration::from_secs(raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
    })
}

fn load_sync_config(raw: JsonSyncOptions) -> Result<SyncConfig> {
    let defaults = SyncConfig::default();

    let page_size = raw.page_size.unwrap_or(defaults.page_size);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        anyhow::bail!(
            "sync.page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE,
            page_size
        );
    }

    let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").context("Invalid identifier pattern")?;
    let table_prefix = raw.table_prefix.unwrap_or(defaults.table_prefix);
    if !identifier.is_match(&table_prefix) {
        anyhow::bail!(
            "sync.table_prefix must be a plain SQL identifier, got {:?}",
            table_prefix
        );
    }
    let registry_table = raw.registry_table.unwrap_or(defaults.registry_table);
    if !identifier.is_match(&registry_table) {
        anyhow::bail!(
            "sync.registry_table must be a plain SQL identifier, got {:?}",
            registry_table
        );
    }

    let primary_key_field = raw
        .primary_key_field
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.primary_key_field);
    let id_field = raw
        .id_field
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.id_field);
    if primary_key_field == id_field {
        anyhow::bail!("sync.primary_key_field and sync.id_field must differ");
    }

    Ok(SyncConfig {
        page_size,
        primary_key_field,
        id_field,
        table_prefix,
        registry_table,
        failure_policy: raw.failure_policy.unwrap_or_default(),
        change_log_path: raw.change_log_path.filter(|p| !p.as_os_str().is_empty()),
        progress: raw.progress.unwrap_or(defaults.progress),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> anyhow::Result<RawJsonConfig> {
        Ok(serde_json::from_value(value)?)
    }

    #[test]
    fn test_minimal_config_uses_defaults() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(
            raw(json!({
                "database_url": "postgres://u:p@localhost/mirror",
                "kintone": {"base_url": "https://example.cybozu.com", "api_token": "abc"}
            }))?,
            &EnvOverrides::default(),
        )?;

        assert_eq!(config.database_url, "postgres://u:p@localhost/mirror");
        assert_eq!(config.kintone.auth, KintoneAuth::ApiToken("abc".to_string()));
        assert_eq!(config.kintone.timeout, Duration::from_secs(60));
        assert_eq!(config.sync.page_size, 500);
        assert_eq!(config.sync.primary_key_field, "レコード番号");
        assert_eq!(config.sync.id_field, "$id");
        assert_eq!(config.sync.failure_policy, FailurePolicy::Abort);
        assert!(config.sync.progress);
        assert_eq!(config.sync.change_log_path, None);
        Ok(())
    }

    #[test]
    fn test_table_name_is_zero_padded() {
        let sync = SyncConfig::default();
        assert_eq!(sync.table_name(42), "app_0000000042");
        assert_eq!(sync.table_name(1234567890), "app_1234567890");
    }

    #[test]
    fn test_env_overrides_win() -> anyhow::Result<()> {
        let overrides = EnvOverrides {
            database_url: Some("postgres://env/db".to_string()),
            login: Some("alice".to_string()),
            password: Some("pw".to_string()),
            ..EnvOverrides::default()
        };
        let config = AppConfig::from_raw(
            raw(json!({
                "database_url": "postgres://file/db",
                "kintone": {"base_url": "https://example.cybozu.com"}
            }))?,
            &overrides,
        )?;

        assert_eq!(config.database_url, "postgres://env/db");
        assert_eq!(
            config.kintone.auth,
            KintoneAuth::Password {
                login: "alice".to_string(),
                password: "pw".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_sync_options_are_parsed() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(
            raw(json!({
                "database_url": "postgres://localhost/db",
                "kintone": {"base_url": "https://example.cybozu.com", "api_token": "t", "timeout_secs": 5},
                "sync": {
                    "page_size": 100,
                    "primary_key_field": "record number",
                    "table_prefix": "kintone_",
                    "failure_policy": "continue",
                    "change_log_path": "logs/changes.jsonl",
                    "progress": false
                }
            }))?,
            &EnvOverrides::default(),
        )?;

        assert_eq!(config.kintone.timeout, Duration::from_secs(5));
        assert_eq!(config.sync.page_size, 100);
        assert_eq!(config.sync.primary_key_field, "record number");
        assert_eq!(config.sync.table_name(7), "kintone_0000000007");
        assert_eq!(config.sync.failure_policy, FailurePolicy::Continue);
        assert_eq!(
            config.sync.change_log_path,
            Some(PathBuf::from("logs/changes.jsonl"))
        );
        assert!(!config.sync.progress);
        Ok(())
    }

    #[test]
    fn test_invalid_settings_are_rejected() -> anyhow::Result<()> {
        let base = json!({
            "database_url": "postgres://localhost/db",
            "kintone": {"base_url": "https://example.cybozu.com", "api_token": "t"}
        });

        let mut oversized = base.clone();
        oversized["sync"] = json!({"page_size": 501});
        assert!(AppConfig::from_raw(raw(oversized)?, &EnvOverrides::default()).is_err());

        let mut bad_prefix = base.clone();
        bad_prefix["sync"] = json!({"table_prefix": "app\"; drop"});
        assert!(AppConfig::from_raw(raw(bad_prefix)?, &EnvOverrides::default()).is_err());

        let mut same_keys = base.clone();
        same_keys["sync"] = json!({"primary_key_field": "$id"});
        assert!(AppConfig::from_raw(raw(same_keys)?, &EnvOverrides::default()).is_err());

        let mut no_auth = base.clone();
        no_auth["kintone"] = json!({"base_url": "https://example.cybozu.com", "login": "only"});
        assert!(AppConfig::from_raw(raw(no_auth)?, &EnvOverrides::default()).is_err());

        let mut ftp = base;
        ftp["kintone"] = json!({"base_url": "ftp://example.com", "api_token": "t"});
        assert!(AppConfig::from_raw(raw(ftp)?, &EnvOverrides::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_unknown_failure_policy_fails_to_parse() {
        let result = serde_json::from_value::<RawJsonConfig>(json!({
            "sync": {"failure_policy": "sometimes"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"database_url": "postgres://localhost/db",
                "kintone": {"base_url": "https://example.cybozu.com", "api_token": "t"}}"#,
        )?;
        let config = AppConfig::load_from_json(&path, &EnvOverrides::default())?;
        assert_eq!(config.kintone.base_url.as_str(), "https://example.cybozu.com/");

        let missing = dir.path().join("missing.json");
        assert!(AppConfig::load_from_json(&missing, &EnvOverrides::default()).is_err());
        Ok(())
    }
}
