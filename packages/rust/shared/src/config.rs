//! Application configuration for IntakeSync.
//!
//! User config lives at `~/.intakesync/intakesync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IntakeSyncError, Result};
use crate::schema::SchemaMapping;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "intakesync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".intakesync";

// ---------------------------------------------------------------------------
// Config structs (matching intakesync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Notion connection settings.
    #[serde(default)]
    pub notion: NotionSettings,

    /// Where the intake and staging sheets live.
    #[serde(default)]
    pub workbook: WorkbookConfig,

    /// How classification output is written to the staging sheet.
    #[serde(default)]
    pub staging: StagingConfig,

    /// Local run ledger and lease store.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Intake column mapping.
    #[serde(default)]
    pub schema: SchemaMapping,
}

impl AppConfig {
    /// Reject settings that load fine but cannot work together.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        // A lease must outlive the single write it guards.
        if self.ledger.enabled && self.ledger.lease_ttl_secs <= self.notion.timeout_secs {
            return Err(IntakeSyncError::config(format!(
                "ledger.lease_ttl_secs ({}) must exceed notion.timeout_secs ({})",
                self.ledger.lease_ttl_secs, self.notion.timeout_secs
            )));
        }
        Ok(())
    }
}

/// `[notion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionSettings {
    /// Name of the env var holding the integration secret (never store the secret itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Target database (container) id.
    #[serde(default)]
    pub database_id: String,

    /// Value of the `Notion-Version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// API base URL, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotionSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            database_id: String::new(),
            api_version: default_api_version(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "NOTION_API_KEY".into()
}
fn default_api_version() -> String {
    "2022-06-28".into()
}
fn default_base_url() -> String {
    "https://api.notion.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[workbook]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookConfig {
    /// Directory holding one `<sheet>.csv` per sheet.
    #[serde(default = "default_workbook_dir")]
    pub dir: String,

    /// Sheet with raw form responses.
    #[serde(default = "default_intake_sheet")]
    pub intake_sheet: String,

    /// Sheet holding classified requests pending sync.
    #[serde(default = "default_staging_sheet")]
    pub staging_sheet: String,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            dir: default_workbook_dir(),
            intake_sheet: default_intake_sheet(),
            staging_sheet: default_staging_sheet(),
        }
    }
}

fn default_workbook_dir() -> String {
    "workbook".into()
}
fn default_intake_sheet() -> String {
    "Form Responses".into()
}
fn default_staging_sheet() -> String {
    "Requests".into()
}

/// What happens to existing staging rows when classification rewrites the sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingPolicy {
    /// Keep manually entered notes, due date, urgency and status by `id`.
    #[default]
    Merge,
    /// Treat the staging sheet as fully derived; manual edits are lost.
    Replace,
}

/// `[staging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    #[serde(default)]
    pub policy: StagingPolicy,
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Record runs and guard ids with leases.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_ledger_path")]
    pub path: String,

    /// How long a per-record lease stays valid if its owner never releases it.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_ledger_path(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ledger_path() -> String {
    "~/.intakesync/ledger.db".into()
}
fn default_lease_ttl() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Notion runtime config (resolved from settings + environment)
// ---------------------------------------------------------------------------

/// Resolved Notion configuration injected into the client and synchronizer.
#[derive(Clone)]
pub struct NotionConfig {
    /// Integration secret sent as a bearer token.
    pub secret: String,
    pub database_id: String,
    pub api_version: String,
    pub base_url: Url,
    pub timeout: Duration,
}

impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionConfig")
            .field("secret", &"<redacted>")
            .field("database_id", &self.database_id)
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NotionConfig {
    /// Build from the `[notion]` section and an already-read secret.
    pub fn from_settings(settings: &NotionSettings, secret: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/')).map_err(|e| {
            IntakeSyncError::config(format!("invalid notion.base_url '{}': {e}", settings.base_url))
        })?;

        Ok(Self {
            secret: secret.into(),
            database_id: settings.database_id.clone(),
            api_version: settings.api_version.clone(),
            base_url,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    /// Join a path onto the base URL, e.g. `pages/{id}`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.intakesync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| IntakeSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.intakesync/intakesync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| IntakeSyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        IntakeSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| IntakeSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| IntakeSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| IntakeSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Check the Notion secret env var and database id, returning the resolved config.
pub fn validate_notion(config: &AppConfig) -> Result<NotionConfig> {
    let var_name = &config.notion.api_key_env;
    let secret = match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => val,
        _ => {
            return Err(IntakeSyncError::config(format!(
                "Notion integration secret not found. Set the {var_name} environment variable."
            )));
        }
    };

    if config.notion.database_id.trim().is_empty() {
        return Err(IntakeSyncError::config(
            "notion.database_id is empty; set it in the config file",
        ));
    }

    NotionConfig::from_settings(&config.notion, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_id"));
        assert!(toml_str.contains("NOTION_API_KEY"));
        assert!(toml_str.contains("policy = \"merge\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.notion.api_version, "2022-06-28");
        assert_eq!(parsed.workbook.staging_sheet, "Requests");
        assert_eq!(parsed.ledger.lease_ttl_secs, 60);
        assert_eq!(parsed.schema.version, 1);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[notion]
database_id = "db-123"

[staging]
policy = "replace"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.notion.database_id, "db-123");
        assert_eq!(config.notion.base_url, "https://api.notion.com/v1");
        assert_eq!(config.staging.policy, StagingPolicy::Replace);
        assert_eq!(config.workbook.intake_sheet, "Form Responses");
    }

    #[test]
    fn load_rejects_bad_schema() {
        let tmp = std::env::temp_dir().join(format!(
            "intakesync_cfg_{}_{}.toml",
            std::process::id(),
            line!()
        ));
        std::fs::write(
            &tmp,
            r#"
[schema]
version = 7
discriminant = "Q"
reimbursement_option = "A"
invoice_option = "B"
fields = []
"#,
        )
        .expect("write temp config");
        let result = load_config_from(&tmp);
        let _ = std::fs::remove_file(&tmp);
        assert!(result.unwrap_err().to_string().contains("schema version 7"));
    }

    #[test]
    fn lease_ttl_must_exceed_http_timeout() {
        assert!(AppConfig::default().validate().is_ok());

        let toml_str = r#"
[notion]
timeout_secs = 30

[ledger]
lease_ttl_secs = 30
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lease_ttl_secs"));

        let mut config = config;
        config.ledger.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn notion_config_endpoint_and_redaction() {
        let settings = NotionSettings {
            database_id: "db".into(),
            base_url: "http://localhost:9999/v1/".into(),
            ..NotionSettings::default()
        };
        let cfg = NotionConfig::from_settings(&settings, "secret_abc").expect("build");
        assert_eq!(cfg.endpoint("pages"), "http://localhost:9999/v1/pages");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("secret_abc"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn notion_validation_requires_secret() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.notion.api_key_env = "IS_TEST_NONEXISTENT_KEY_12345".into();
        config.notion.database_id = "db".into();
        let result = validate_notion(&config);
        assert!(result.unwrap_err().to_string().contains("secret not found"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/ledger.db"), PathBuf::from("/tmp/ledger.db"));
        assert_eq!(expand_home("workbook"), PathBuf::from("workbook"));
    }
}
