//! Site credentials and their comma-separated configuration format.
//!
//! A credential is written in the YAML configuration as a single-key map:
//!
//! ```yaml
//! credential:
//!   password: "user,password"
//! # or
//! credential:
//!   app: "appId,domain,certProvider,certStore,certThumbprint"
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential value must be non-empty")]
    Empty,
    #[error("credential must set exactly one of 'password' or 'app'")]
    Kind,
}

/// User name + password credential. Format: `user[,password]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordSiteCredential {
    pub user_name: String,
    pub user_password: Option<String>,
}

impl PasswordSiteCredential {
    /// Splits at the first comma: everything after it is the password, so
    /// passwords may themselves contain commas.
    pub fn load(value: &str) -> Result<Self, CredentialError> {
        if value.is_empty() {
            return Err(CredentialError::Empty);
        }
        let cred = match value.split_once(',') {
            Some((user, password)) => Self {
                user_name: user.to_string(),
                user_password: Some(password.to_string()),
            },
            None => Self {
                user_name: value.to_string(),
                user_password: None,
            },
        };
        Ok(cred)
    }

    fn to_raw(&self) -> String {
        match &self.user_password {
            Some(password) => format!("{},{}", self.user_name, password),
            None => self.user_name.clone(),
        }
    }
}

/// App-only credential backed by a certificate.
/// Format: `appId[,domain[,certProvider[,certStore[,certThumbprint]]]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSiteCredential {
    pub app_id: String,
    pub domain: Option<String>,
    pub certificate_provider: Option<String>,
    pub certificate_store: Option<String>,
    pub certificate: Option<String>,
}

impl AppSiteCredential {
    pub fn load(value: &str) -> Result<Self, CredentialError> {
        if value.is_empty() {
            return Err(CredentialError::Empty);
        }
        let mut parts = value.split(',').map(str::to_string);
        Ok(Self {
            app_id: parts.next().unwrap_or_default(),
            domain: parts.next(),
            certificate_provider: parts.next(),
            certificate_store: parts.next(),
            certificate: parts.next(),
        })
    }

    fn to_raw(&self) -> String {
        let mut raw = self.app_id.clone();
        let tail = [
            &self.domain,
            &self.certificate_provider,
            &self.certificate_store,
            &self.certificate,
        ];
        for part in tail.into_iter().map_while(Option::as_ref) {
            raw.push(',');
            raw.push_str(part);
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCredential", into = "RawCredential")]
pub enum SiteCredential {
    Password(PasswordSiteCredential),
    App(AppSiteCredential),
}

impl SiteCredential {
    pub fn kind(&self) -> &'static str {
        match self {
            SiteCredential::Password(_) => "password",
            SiteCredential::App(_) => "app",
        }
    }
}

/// Never prints secrets.
impl fmt::Display for SiteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteCredential::Password(c) => write!(f, "password: {}", c.user_name),
            SiteCredential::App(c) => write!(
                f,
                "app: {}/{}, certificate {}/{}/{}",
                c.app_id,
                c.domain.as_deref().unwrap_or_default(),
                c.certificate_provider.as_deref().unwrap_or_default(),
                c.certificate_store.as_deref().unwrap_or_default(),
                c.certificate.as_deref().unwrap_or_default(),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app: Option<String>,
}

impl TryFrom<RawCredential> for SiteCredential {
    type Error = CredentialError;

    fn try_from(raw: RawCredential) -> Result<Self, Self::Error> {
        match (raw.password, raw.app) {
            (Some(v), None) => PasswordSiteCredential::load(&v).map(Self::Password),
            (None, Some(v)) => AppSiteCredential::load(&v).map(Self::App),
            _ => Err(CredentialError::Kind),
        }
    }
}

impl From<SiteCredential> for RawCredential {
    fn from(cred: SiteCredential) -> Self {
        match cred {
            SiteCredential::Password(c) => RawCredential {
                password: Some(c.to_raw()),
                ..Default::default()
            },
            SiteCredential::App(c) => RawCredential {
                app: Some(c.to_raw()),
                ..Default::default()
            },
        }
    }
}
