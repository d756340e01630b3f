//! Process-wide cache of list schemas keyed by equivalent list aliases.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::client::ListRef;
use crate::error::{Result, SharePointError};
use crate::names::ListNameResolver;
use crate::site::{SiteService, SiteServiceProvider};

pub mod identity;
pub mod info;

pub use identity::ListIdentity;
pub use info::{FieldInfo, FieldKind, ListInfo};

/// The ways a caller may name a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListKey {
    /// `site/list`, resolved with the configured defaults.
    FullName(String),
    /// Site by name, URL or GUID; list by title or GUID.
    SiteList { site: String, list: String },
    Ids { site_id: Uuid, list_id: Uuid },
}

impl ListKey {
    pub fn full_name(name: impl Into<String>) -> Self {
        ListKey::FullName(name.into())
    }

    pub fn site_list(site: impl Into<String>, list: impl Into<String>) -> Self {
        ListKey::SiteList {
            site: site.into(),
            list: list.into(),
        }
    }
}

struct Entry {
    identity: ListIdentity,
    info: Arc<ListInfo>,
}

/// Where to fetch a list from on a cache miss.
enum Source {
    Site(String),
    SiteId(Uuid),
}

pub struct MetadataCache {
    sites: Arc<SiteServiceProvider>,
    resolver: ListNameResolver,
    entries: Mutex<Vec<Entry>>,
}

impl MetadataCache {
    pub fn new(sites: Arc<SiteServiceProvider>, resolver: ListNameResolver) -> Self {
        Self {
            sites,
            resolver,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup_key(&self, key: &ListKey) -> Result<(ListIdentity, Source, String)> {
        match key {
            ListKey::FullName(name) => {
                let path = self.resolver.resolve(Some(name))?;
                let mut identity = ListIdentity::from_parts(&path.site, &path.list);
                identity.add(name);
                Ok((identity, Source::Site(path.site), path.list))
            }
            ListKey::SiteList { site, list } => {
                if site.is_empty() || list.is_empty() {
                    return Err(SharePointError::config(
                        "both the site and the list must be provided",
                    ));
                }
                Ok((
                    ListIdentity::from_parts(site, list),
                    Source::Site(site.clone()),
                    list.clone(),
                ))
            }
            ListKey::Ids { site_id, list_id } => Ok((
                ListIdentity::from_parts(site_id, list_id),
                Source::SiteId(*site_id),
                list_id.to_string(),
            )),
        }
    }

    fn find(&self, identity: &ListIdentity) -> Option<Arc<ListInfo>> {
        self.entries()
            .iter()
            .find(|e| e.identity == *identity)
            .map(|e| e.info.clone())
    }

    fn site(&self, source: &Source) -> Result<Arc<SiteService>> {
        match source {
            Source::Site(site) => self.sites.get(site),
            Source::SiteId(id) => self
                .sites
                .get_by_id(*id)
                .ok_or_else(|| SharePointError::SiteNotConfigured(id.to_string())),
        }
    }

    /// Returns the cached schema, fetching it on a miss. Concurrent misses
    /// for one list all receive the first inserted instance.
    #[instrument(skip_all, fields(key = ?key))]
    pub async fn get_list_info(
        &self,
        key: &ListKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<ListInfo>> {
        let (mut identity, source, list) = self.lookup_key(key)?;
        if let Some(info) = self.find(&identity) {
            return Ok(info);
        }

        let site = self.site(&source)?;
        let schema = site
            .get_list_schema(&ListRef::parse(&list), cancel)
            .await?;
        let info = Arc::new(ListInfo::from_schema(
            site.name(),
            site.url(),
            site.id(),
            &schema,
        ));
        identity.enrich(
            site.name(),
            site.url(),
            site.id(),
            &schema.list.title,
            schema.list.id,
        );
        identity.enrich(
            site.name(),
            site.configured_url(),
            site.id(),
            &schema.list.title,
            schema.list.id,
        );

        let mut entries = self.entries();
        if let Some(existing) = entries.iter_mut().find(|e| e.identity == identity) {
            debug!(list = %existing.info.full_name(), "list info inserted concurrently");
            existing.identity.merge(identity);
            return Ok(existing.info.clone());
        }
        info!(list = %info.full_name(), fields = info.fields.len(), "list info cached");
        entries.push(Entry {
            identity,
            info: info.clone(),
        });
        Ok(info)
    }

    /// Removes the entry matching `key`. Returns whether one was removed.
    pub fn invalidate(&self, key: &ListKey) -> Result<bool> {
        let (identity, _, _) = self.lookup_key(key)?;
        let mut entries = self.entries();
        match entries.iter().position(|e| e.identity == identity) {
            Some(idx) => {
                let removed = entries.remove(idx);
                debug!(list = %removed.info.full_name(), "list info invalidated");
                Ok(true)
            }
            None => {
                debug!(key = ?key, "no list info to invalidate");
                Ok(false)
            }
        }
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        debug!(count = entries.len(), "list info cache cleared");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
