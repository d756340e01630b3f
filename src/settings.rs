//! Read-only view over the configured sites and accounts.
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{SharePointSettings, SiteAccountSettings, SiteSettings};
use crate::error::{Result, SharePointError};

/// Everything needed to bring up one site: replaces an untyped bag of
/// named context values.
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub site_name: String,
    pub settings: SiteSettings,
    pub account: Option<SiteAccountSettings>,
    pub keep_alive: Duration,
}

#[derive(Debug, Clone)]
pub struct SiteSettingsStore {
    settings: Arc<SharePointSettings>,
}

impl SiteSettingsStore {
    pub fn new(settings: SharePointSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &SharePointSettings {
        &self.settings
    }

    /// Sites ordered by name.
    pub fn list_sites(&self) -> impl Iterator<Item = (&str, &SiteSettings)> {
        self.settings.sites.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Accounts ordered by name.
    pub fn list_accounts(&self) -> impl Iterator<Item = (&str, &SiteAccountSettings)> {
        self.settings.accounts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Looks a site up by configured name, then by site URL. Both compare
    /// case-insensitively; an exact name match wins.
    pub fn site_settings(&self, site: &str) -> Result<(&str, &SiteSettings)> {
        if let Some((name, settings)) = self.settings.sites.get_key_value(site) {
            return Ok((name.as_str(), settings));
        }
        let wanted = site.trim_end_matches('/');
        self.list_sites()
            .find(|(name, _)| name.eq_ignore_ascii_case(site))
            .or_else(|| {
                self.list_sites().find(|(_, s)| {
                    !s.site_url.is_empty()
                        && s.site_url.trim_end_matches('/').eq_ignore_ascii_case(wanted)
                })
            })
            .ok_or_else(|| {
                SharePointError::Config(format!(
                    "site '{}' not found in the configuration file, the 'sites' section",
                    site
                ))
            })
    }

    /// Resolves the credentials for a site. An explicit `account_name` wins
    /// over the site's configured account; an inline site credential wins
    /// over both.
    pub fn resolve_account(
        &self,
        site_name: &str,
        account_name: Option<&str>,
    ) -> Result<SiteAccountSettings> {
        let (site_name, site) = self.site_settings(site_name)?;
        if let Some(credential) = &site.credential {
            return Ok(SiteAccountSettings {
                credential: Some(credential.clone()),
            });
        }

        let account_name = account_name.or(site.account.as_deref()).ok_or_else(|| {
            SharePointError::Config(format!("no account configured for site {}", site_name))
        })?;
        self.settings
            .accounts
            .get(account_name)
            .cloned()
            .ok_or_else(|| {
                SharePointError::Config(format!(
                    "no account settings found for {} and site {}",
                    account_name, site_name
                ))
            })
    }

    /// One context per configured site. Credential problems are logged and
    /// left for the site connection to report.
    pub fn site_contexts(&self, keep_alive: Duration) -> Vec<SiteContext> {
        self.list_sites()
            .map(|(name, settings)| {
                let account = match self.resolve_account(name, None) {
                    Ok(account) => Some(account),
                    Err(err) => {
                        warn!(site = name, %err, "no credentials for site");
                        None
                    }
                };
                SiteContext {
                    site_name: name.to_string(),
                    settings: settings.clone(),
                    account,
                    keep_alive,
                }
            })
            .collect()
    }
}
