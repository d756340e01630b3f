//! Error taxonomy shared by the resolver, the site services, the metadata
//! cache and the update pipeline.
use thiserror::Error;

pub type Result<T, E = SharePointError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SharePointError {
    /// Missing defaults, malformed full names, unknown sites/accounts.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("SharePoint site {0} not configured")]
    SiteNotConfigured(String),

    #[error("SharePoint site {site} is not ready (state: {state})")]
    NotReady { site: String, state: String },

    #[error("cannot connect to SharePoint site '{url}': {reason}")]
    Connection { url: String, reason: String },

    #[error("credential type '{0}' is not supported")]
    UnsupportedCredential(String),

    #[error("list {0} not found")]
    ListNotFound(String),

    #[error("list {0} is not a document library")]
    NotADocumentLibrary(String),

    #[error("field '{field}' not found in list {list}")]
    UnknownField { list: String, field: String },

    #[error("invalid value for field '{field}' of list {list}: {reason}")]
    InvalidFieldValue {
        list: String,
        field: String,
        reason: String,
    },

    #[error("file '{name}' with size {size} exceeds maximum configured size of {max}")]
    MaxFileSizeExceeded { name: String, size: u64, max: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SharePointError {
    pub fn config(message: impl Into<String>) -> Self {
        SharePointError::Config(message.into())
    }

    /// Configuration problems are reported to the caller as-is; everything
    /// else is an operational failure.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SharePointError::Config(_) | SharePointError::SiteNotConfigured(_)
        )
    }

    /// Recovers a typed error raised below an `anyhow` boundary.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<SharePointError>() {
            Ok(err) => err,
            Err(err) => SharePointError::Other(err),
        }
    }
}
