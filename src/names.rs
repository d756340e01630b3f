//! Resolution of `<site>/<list>` full names.
use std::fmt;

use crate::config::DefaultSettings;
use crate::error::{Result, SharePointError};
use crate::model::ListItem;

pub const FULL_NAME_SEPARATOR: char = '/';

/// A resolved full name; both parts are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListPath {
    pub site: String,
    pub list: String,
}

impl fmt::Display for ListPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.site, FULL_NAME_SEPARATOR, self.list)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListNameResolver {
    default_site: Option<String>,
    default_list: Option<String>,
}

impl ListNameResolver {
    pub fn new(defaults: &DefaultSettings) -> Self {
        Self::with_defaults(defaults.site.as_deref(), Some(defaults.library.as_str()))
    }

    pub fn with_defaults(site: Option<&str>, list: Option<&str>) -> Self {
        let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            default_site: non_empty(site),
            default_list: non_empty(list),
        }
    }

    pub fn default_site(&self) -> Option<&str> {
        self.default_site.as_deref()
    }

    /// `defaultSite/defaultList`, or just the list when no default site is set.
    pub fn default_full_name(&self) -> Option<String> {
        let list = self.default_list.as_deref()?;
        Some(match &self.default_site {
            Some(site) => format!("{}{}{}", site, FULL_NAME_SEPARATOR, list),
            None => list.to_string(),
        })
    }

    /// Splits a full name on its last separator. A missing or empty full
    /// name falls back to the configured defaults.
    ///
    /// A leading separator (`/L`) is an empty site segment: the default site
    /// applies and the separator is dropped, so the list is `L`, never `/L`.
    pub fn resolve(&self, full_name: Option<&str>) -> Result<ListPath> {
        let full_name = match full_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name.to_string(),
            None => self.default_full_name().ok_or_else(|| {
                SharePointError::config(
                    "list full name not provided and the default settings do not specify a list, either",
                )
            })?,
        };

        let (site, list) = match full_name.rfind(FULL_NAME_SEPARATOR) {
            Some(idx) if idx > 0 => (
                full_name[..idx].to_string(),
                full_name[idx + 1..].to_string(),
            ),
            _ => {
                let site = self.default_site.clone().ok_or_else(|| {
                    SharePointError::Config(format!(
                        "list full name does not contain a site: '{}', and the default settings do not specify a site, either. List full names should have the form: <site-name>{}<list-name>",
                        full_name, FULL_NAME_SEPARATOR
                    ))
                })?;
                (site, full_name.trim_start_matches(FULL_NAME_SEPARATOR).to_string())
            }
        };

        if list.is_empty() {
            return Err(SharePointError::Config(format!(
                "list full name '{}' does not name a list",
                full_name
            )));
        }
        Ok(ListPath { site, list })
    }

    /// The full name of the list containing `item`: `site/list` when the
    /// item names its site, its list otherwise, the defaults when it names
    /// neither.
    pub fn containing_list(&self, item: &ListItem) -> Option<String> {
        let list = item.list.as_deref().filter(|l| !l.is_empty());
        let site = item.site.as_deref().filter(|s| !s.is_empty());
        match (site, list) {
            (_, None) => self.default_full_name(),
            (None, Some(list)) => Some(list.to_string()),
            (Some(site), Some(list)) => Some(format!("{}{}{}", site, FULL_NAME_SEPARATOR, list)),
        }
    }

    pub fn resolve_item(&self, item: &ListItem) -> Result<ListPath> {
        self.resolve(self.containing_list(item).as_deref())
    }
}

pub fn is_list_full_name(name: &str) -> bool {
    matches!(name.find(FULL_NAME_SEPARATOR), Some(idx) if idx > 0)
}
