use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::names::FULL_NAME_SEPARATOR;

/// A set of case-insensitive aliases denoting the same list.
///
/// Two identities are equal when their alias sets intersect. This is not
/// transitive, so identities are never used as hash keys.
#[derive(Debug, Clone, Default)]
pub struct ListIdentity {
    aliases: HashSet<String>,
}

impl ListIdentity {
    pub fn new(alias: impl AsRef<str>) -> Self {
        let mut identity = Self::default();
        identity.add(alias);
        identity
    }

    pub fn from_parts(site: impl fmt::Display, list: impl fmt::Display) -> Self {
        Self::new(format!("{}{}{}", site, FULL_NAME_SEPARATOR, list))
    }

    /// Adds an alias; empty aliases are ignored.
    pub fn add(&mut self, alias: impl AsRef<str>) {
        let alias = alias.as_ref().trim();
        if !alias.is_empty() {
            self.aliases.insert(alias.to_lowercase());
        }
    }

    fn add_parts(&mut self, site: &str, list: &str) {
        if !site.is_empty() && !list.is_empty() {
            self.add(format!("{}{}{}", site, FULL_NAME_SEPARATOR, list));
        }
    }

    /// Adds every `site/list` combination of the known site and list
    /// identifiers. Existing aliases are kept.
    pub fn enrich(
        &mut self,
        site_name: &str,
        site_url: &str,
        site_id: Option<Uuid>,
        list_title: &str,
        list_id: Uuid,
    ) {
        let site_url = site_url.trim_end_matches('/');
        let site_id = site_id.map(|id| id.to_string()).unwrap_or_default();
        let list_id = list_id.to_string();
        for site in [site_name, site_url, site_id.as_str()] {
            self.add_parts(site, list_title);
            self.add_parts(site, &list_id);
        }
    }

    /// Moves the other identity's aliases into this one.
    pub fn merge(&mut self, other: ListIdentity) {
        self.aliases.extend(other.aliases);
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains(&alias.trim().to_lowercase())
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl PartialEq for ListIdentity {
    fn eq(&self, other: &Self) -> bool {
        let (small, large) = if self.aliases.len() <= other.aliases.len() {
            (&self.aliases, &other.aliases)
        } else {
            (&other.aliases, &self.aliases)
        };
        small.iter().any(|alias| large.contains(alias))
    }
}

impl fmt::Display for ListIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aliases: Vec<_> = self.aliases.iter().map(String::as_str).collect();
        aliases.sort_unstable();
        write!(f, "[{}]", aliases.join(", "))
    }
}
