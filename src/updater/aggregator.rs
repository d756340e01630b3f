//! Routes updates to the pipeline of the site named by each item.
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::behavior::BehaviorRegistry;
use super::rules;
use super::site_core::SiteItemUpdater;
use super::{ListUpdater, UpdateContext, UpdateResult};
use crate::config::DefaultSettings;
use crate::error::{Result, SharePointError};
use crate::metadata::MetadataCache;
use crate::model::ListItem;
use crate::names::ListNameResolver;
use crate::settings::{SiteContext, SiteSettingsStore};
use crate::site::SiteServiceProvider;

/// Builds the pipeline of one site.
#[async_trait]
pub trait ListUpdaterFactory: Send + Sync {
    async fn create(&self, site: &SiteContext, cancel: &CancellationToken) -> Result<ListUpdater>;
}

/// Pipelines writing through the connected [`SiteServiceProvider`] sites.
pub struct SiteListUpdaterFactory {
    sites: Arc<SiteServiceProvider>,
    metadata: Arc<MetadataCache>,
    resolver: ListNameResolver,
    defaults: DefaultSettings,
    behaviors: BehaviorRegistry,
}

impl SiteListUpdaterFactory {
    pub fn new(
        sites: Arc<SiteServiceProvider>,
        metadata: Arc<MetadataCache>,
        resolver: ListNameResolver,
        defaults: DefaultSettings,
        behaviors: BehaviorRegistry,
    ) -> Self {
        Self {
            sites,
            metadata,
            resolver,
            defaults,
            behaviors,
        }
    }
}

#[async_trait]
impl ListUpdaterFactory for SiteListUpdaterFactory {
    async fn create(&self, site: &SiteContext, _cancel: &CancellationToken) -> Result<ListUpdater> {
        let service = self.sites.get(&site.site_name)?;
        if !service.is_ready() {
            return Err(SharePointError::NotReady {
                site: site.site_name.clone(),
                state: service.state().to_string(),
            });
        }
        let core = SiteItemUpdater::new(
            service,
            self.metadata.clone(),
            self.resolver.clone(),
            rules::from_defaults(&self.defaults),
            self.defaults.sync_id_field.clone(),
        );
        Ok(ListUpdater::new(
            site.site_name.clone(),
            self.behaviors.build(site),
            Arc::new(core),
        ))
    }
}

/// One pipeline per site that initialized; the others are left out.
pub struct SharePointUpdater {
    resolver: ListNameResolver,
    store: SiteSettingsStore,
    updaters: BTreeMap<String, ListUpdater>,
}

impl SharePointUpdater {
    #[instrument(skip_all, fields(sites = contexts.len()))]
    pub async fn initialize(
        contexts: Vec<SiteContext>,
        factory: &dyn ListUpdaterFactory,
        resolver: ListNameResolver,
        store: SiteSettingsStore,
        cancel: &CancellationToken,
    ) -> Self {
        let created = join_all(contexts.iter().map(|c| factory.create(c, cancel))).await;
        let mut updaters = BTreeMap::new();
        for (context, res) in contexts.iter().zip(created) {
            match res {
                Ok(updater) => {
                    updaters.insert(context.site_name.clone(), updater);
                }
                Err(err) => {
                    warn!(site = %context.site_name, error = %err, "list updater not initialized, site excluded")
                }
            }
        }
        info!(sites = ?updaters.keys().collect::<Vec<_>>(), "list updaters initialized");
        Self {
            resolver,
            store,
            updaters,
        }
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.updaters.keys().map(String::as_str)
    }

    fn updater(&self, site: &str) -> Option<&ListUpdater> {
        self.updaters.get(site).or_else(|| {
            self.store
                .site_settings(site)
                .ok()
                .and_then(|(name, _)| self.updaters.get(name))
        })
    }

    /// Never fails: routing and pipeline errors come back as a failed result.
    pub async fn update_list_item(&self, item: &mut ListItem, ctx: &UpdateContext) -> UpdateResult {
        let started = Instant::now();
        let path = match self.resolver.resolve_item(item) {
            Ok(path) => path,
            Err(err) => {
                warn!(item = %item, error = %err, "cannot route list item");
                let mut result = UpdateResult::failed(err);
                result.elapsed = started.elapsed();
                return result;
            }
        };

        match self.updater(&path.site) {
            Some(updater) => updater.update_list_item(item, ctx).await,
            None => {
                let err = SharePointError::SiteNotConfigured(path.site.clone());
                warn!(item = %item, error = %err, "no list updater for site");
                let mut result = UpdateResult::failed(format!(
                    "{} or its initialization failed, cannot update {}",
                    err, item
                ));
                result.elapsed = started.elapsed();
                result
            }
        }
    }

    /// Finalizes every pipeline; a failing one does not stop the others.
    pub async fn finalize(&self) {
        let results = join_all(
            self.updaters
                .iter()
                .map(|(site, updater)| async move { (site, updater.finalize().await) }),
        )
        .await;
        for (site, res) in results {
            if let Err(err) = res {
                error!(site = %site, error = %format!("{:#}", err), "list updater finalization failed");
            }
        }
    }
}
