//! Configuration loader and validator for the SharePoint sync service.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::credential::SiteCredential;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    pub sharepoint: SharePointSettings,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            keep_alive_seconds: default_keep_alive_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl App {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }
}

fn default_keep_alive_seconds() -> u64 {
    60
}

fn default_user_agent() -> String {
    "sharepoint-sync/0.1".to_string()
}

/// Sites, accounts and defaults. Maps are ordered by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SharePointSettings {
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSettings>,
    #[serde(default)]
    pub accounts: BTreeMap<String, SiteAccountSettings>,
    #[serde(default)]
    pub defaults: DefaultSettings,
}

/// One SharePoint site.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteSettings {
    #[serde(default)]
    pub site_url: String,
    /// Name of an entry in `accounts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Inline credential; wins over the account's credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SiteCredential>,
}

/// A named credential bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteAccountSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SiteCredential>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultSettings {
    pub sync_id_field: String,
    pub sync_tool_field: String,
    pub text_content_field: String,
    pub original_name_field: String,
    pub parent_id_field: String,
    pub group_field: String,
    pub keywords_field: String,
    pub site: Option<String>,
    pub library: String,
    /// Maximum document size in bytes; 0 disables the check.
    pub max_file_size: u64,
    /// Field values applied to items that do not set them.
    pub fields: BTreeMap<String, Value>,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            sync_id_field: "SyncID".into(),
            sync_tool_field: "SyncTool".into(),
            text_content_field: "TextContent".into(),
            original_name_field: "OriginalName".into(),
            parent_id_field: "ParentID".into(),
            group_field: "Group".into(),
            keywords_field: "Keywords".into(),
            site: None,
            library: "Unsorted".into(),
            max_file_size: 0,
            fields: BTreeMap::new(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate configuration from a YAML string.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. Per-site problems (missing URL, unknown
/// account) are reported when the site connects, not here.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.keep_alive_seconds == 0 {
        return Err(ConfigError::Invalid("app.keep_alive_seconds must be > 0"));
    }
    if cfg.app.user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid("app.user_agent must be non-empty"));
    }
    if cfg.sharepoint.sites.keys().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Invalid("sharepoint.sites keys must be non-empty"));
    }
    if cfg.sharepoint.accounts.keys().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Invalid("sharepoint.accounts keys must be non-empty"));
    }
    if cfg.sharepoint.sites.keys().any(|k| k.contains('/')) {
        return Err(ConfigError::Invalid("sharepoint.sites keys must not contain '/'"));
    }
    Ok(())
}

/// Returns an example configuration.
pub fn example() -> &'static str {
    r#"app:
  keep_alive_seconds: 60

sharepoint:
  accounts:
    service:
      credential:
        password: "sync@contoso.onmicrosoft.com,CHANGE_ME"
    app-only:
      credential:
        app: "00000000-0000-0000-0000-000000000000,contoso.onmicrosoft.com,local,CurrentUser,THUMBPRINT"

  sites:
    alpha:
      site_url: "https://contoso.sharepoint.com/sites/alpha"
      account: service
    beta:
      site_url: "https://contoso.sharepoint.com/sites/beta"
      account: app-only

  defaults:
    site: alpha
    library: Documents
    max_file_size: 10485760
    fields:
      Department: "Sales"
"#
}
