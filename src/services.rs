//! Wires the settings store, site sessions, metadata cache and updaters.
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::SessionProvider;
use crate::config::Config;
use crate::metadata::MetadataCache;
use crate::names::ListNameResolver;
use crate::settings::SiteSettingsStore;
use crate::site::SiteServiceProvider;
use crate::updater::{BehaviorRegistry, SharePointUpdater, SiteListUpdaterFactory};

pub struct Services {
    pub store: SiteSettingsStore,
    pub resolver: ListNameResolver,
    pub sites: Arc<SiteServiceProvider>,
    pub metadata: Arc<MetadataCache>,
    pub updater: SharePointUpdater,
    cancel: CancellationToken,
}

impl Services {
    /// Connects every configured site. Sites that cannot connect are logged
    /// and left out; startup itself does not fail.
    pub async fn start(
        config: &Config,
        provider: &dyn SessionProvider,
        behaviors: BehaviorRegistry,
    ) -> Self {
        let cancel = CancellationToken::new();
        let store = SiteSettingsStore::new(config.sharepoint.clone());
        let resolver = ListNameResolver::new(&config.sharepoint.defaults);
        let contexts = store.site_contexts(config.app.keep_alive());

        let sites = Arc::new(SiteServiceProvider::initialize(contexts.clone(), provider, &cancel).await);
        let metadata = Arc::new(MetadataCache::new(sites.clone(), resolver.clone()));
        let factory = SiteListUpdaterFactory::new(
            sites.clone(),
            metadata.clone(),
            resolver.clone(),
            config.sharepoint.defaults.clone(),
            behaviors,
        );
        let updater = SharePointUpdater::initialize(
            contexts,
            &factory,
            resolver.clone(),
            store.clone(),
            &cancel,
        )
        .await;

        Self {
            store,
            resolver,
            sites,
            metadata,
            updater,
            cancel,
        }
    }

    /// Cancelled on shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.updater.finalize().await;
        self.sites.finalize().await;
        self.metadata.clear();
        info!("services stopped");
    }
}
