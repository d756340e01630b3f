//! Site Session Manager: one authenticated session per configured site.
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::client::{
    ItemQuery, ListHandle, ListRef, ListSchema, RawItem, SessionProvider, SiteSession, WebInfo,
};
use crate::error::{Result, SharePointError};
use crate::settings::SiteContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
    Finalized,
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteState::Uninitialized => write!(f, "uninitialized"),
            SiteState::Initializing => write!(f, "initializing"),
            SiteState::Ready => write!(f, "ready"),
            SiteState::Failed(reason) => write!(f, "failed: {}", reason),
            SiteState::Finalized => write!(f, "finalized"),
        }
    }
}

struct Connected {
    session: Arc<dyn SiteSession>,
    web: WebInfo,
}

/// Counts a request as in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SiteService {
    context: SiteContext,
    state: Mutex<SiteState>,
    connected: OnceLock<Connected>,
    in_flight: Arc<AtomicUsize>,
    keep_alive_stop: CancellationToken,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SiteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteService")
            .field("name", &self.context.site_name)
            .field("url", &self.context.settings.site_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SiteService {
    pub fn new(context: SiteContext) -> Self {
        Self {
            context,
            state: Mutex::new(SiteState::Uninitialized),
            connected: OnceLock::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            keep_alive_stop: CancellationToken::new(),
            keep_alive_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.context.site_name
    }

    /// The URL reported by SharePoint once connected, the configured one before.
    pub fn url(&self) -> &str {
        match self.connected.get() {
            Some(c) if !c.web.url.is_empty() => &c.web.url,
            _ => &self.context.settings.site_url,
        }
    }

    pub fn configured_url(&self) -> &str {
        &self.context.settings.site_url
    }

    pub fn id(&self) -> Option<Uuid> {
        self.connected.get().map(|c| c.web.id)
    }

    pub fn title(&self) -> Option<&str> {
        self.connected.get().map(|c| c.web.title.as_str())
    }

    pub fn context(&self) -> &SiteContext {
        &self.context
    }

    pub fn state(&self) -> SiteState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SiteState::Ready
    }

    fn set_state(&self, state: SiteState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn not_ready(&self, state: SiteState) -> SharePointError {
        SharePointError::NotReady {
            site: self.context.site_name.clone(),
            state: state.to_string(),
        }
    }

    /// Connects the session and starts the keep-alive. A failure leaves the
    /// service in the terminal `Failed` state.
    #[instrument(skip_all, fields(site = %self.context.site_name))]
    pub async fn initialize(
        &self,
        provider: &dyn SessionProvider,
        cancel: &CancellationToken,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SiteState::Uninitialized {
                return Err(self.not_ready(state.clone()));
            }
            *state = SiteState::Initializing;
        }

        match self.connect(provider, cancel).await {
            Ok(connected) => {
                info!(site_id = %connected.web.id, url = %connected.web.url, "site ready");
                let handle = spawn_keep_alive(
                    self.context.site_name.clone(),
                    connected.session.clone(),
                    self.in_flight.clone(),
                    self.context.keep_alive,
                    self.keep_alive_stop.clone(),
                );
                *self
                    .keep_alive_task
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                // Only one initialize gets past the state check above.
                let _ = self.connected.set(connected);
                self.set_state(SiteState::Ready);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "site initialization failed");
                self.set_state(SiteState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn connect(
        &self,
        provider: &dyn SessionProvider,
        cancel: &CancellationToken,
    ) -> Result<Connected> {
        let settings = &self.context.settings;
        if settings.site_url.trim().is_empty() {
            return Err(SharePointError::Config(format!(
                "site URL is not configured for site {}",
                self.context.site_name
            )));
        }
        let connection_error = |err: anyhow::Error| match err.downcast::<SharePointError>() {
            Ok(err) => err,
            Err(err) => SharePointError::Connection {
                url: settings.site_url.clone(),
                reason: format!("{:#}", err),
            },
        };

        let session = tokio::select! {
            _ = cancel.cancelled() => return Err(SharePointError::Cancelled),
            res = provider.connect(settings, self.context.account.as_ref()) => {
                res.map_err(connection_error)?
            }
        };
        let web = tokio::select! {
            _ = cancel.cancelled() => return Err(SharePointError::Cancelled),
            res = session.web() => res.map_err(connection_error)?,
        };
        Ok(Connected { session, web })
    }

    fn connected(&self) -> Result<&Connected> {
        let state = self.state();
        match (&state, self.connected.get()) {
            (SiteState::Ready, Some(connected)) => Ok(connected),
            _ => Err(self.not_ready(state)),
        }
    }

    /// Raw session handle for collaborators that need direct calls.
    pub fn session(&self) -> Result<Arc<dyn SiteSession>> {
        Ok(self.connected()?.session.clone())
    }

    async fn call<T, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let _in_flight = InFlight::enter(&self.in_flight);
        tokio::select! {
            _ = cancel.cancelled() => Err(SharePointError::Cancelled),
            res = fut => res.map_err(SharePointError::from_anyhow),
        }
    }

    /// `name_or_id` may be a list title, a `site/list` full name or a list GUID.
    pub async fn get_list(&self, name_or_id: &str, cancel: &CancellationToken) -> Result<ListHandle> {
        let session = &self.connected()?.session;
        let list = ListRef::parse(name_or_id);
        self.call(cancel, session.get_list(&list)).await
    }

    pub async fn get_list_schema(
        &self,
        list: &ListRef,
        cancel: &CancellationToken,
    ) -> Result<ListSchema> {
        let session = &self.connected()?.session;
        self.call(cancel, session.get_list_schema(list)).await
    }

    pub async fn get_list_items(
        &self,
        name_or_id: &str,
        query: &ItemQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawItem>> {
        let session = &self.connected()?.session;
        let list = ListRef::parse(name_or_id);
        self.call(cancel, session.get_list_items(&list, query)).await
    }

    pub async fn update_list_item(
        &self,
        list: &ListRef,
        item_id: i64,
        fields: &RawItem,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let session = &self.connected()?.session;
        self.call(cancel, session.update_list_item(list, item_id, fields))
            .await
    }

    pub async fn upload_file(
        &self,
        list: &ListRef,
        item_id: i64,
        folder: &str,
        name: &str,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let session = &self.connected()?.session;
        self.call(cancel, session.upload_file(list, item_id, folder, name, content))
            .await
    }

    /// Stops the keep-alive and releases the session. Safe to call twice.
    pub async fn finalize(&self) {
        self.keep_alive_stop.cancel();
        let handle = self
            .keep_alive_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(site = %self.context.site_name, error = %err, "keep-alive task ended abnormally");
            }
        }
        self.set_state(SiteState::Finalized);
        debug!(site = %self.context.site_name, "site finalized");
    }
}

impl Drop for SiteService {
    fn drop(&mut self) {
        self.keep_alive_stop.cancel();
    }
}

fn spawn_keep_alive(
    site: String,
    session: Arc<dyn SiteSession>,
    in_flight: Arc<AtomicUsize>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Claim the session only when it is idle.
            if in_flight
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(site = %site, "request in flight, skipping keep-alive");
                continue;
            }
            let res = session.keep_alive().await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            match res {
                Ok(()) => debug!(site = %site, "keep-alive"),
                Err(err) => warn!(site = %site, error = %format!("{:#}", err), "keep-alive failed"),
            }
        }
    })
}

/// Owns the [`SiteService`] of every configured site that connected.
#[derive(Debug, Default)]
pub struct SiteServiceProvider {
    sites: Vec<Arc<SiteService>>,
}

impl SiteServiceProvider {
    /// Initializes all sites concurrently. Sites that fail are logged and
    /// left out.
    #[instrument(skip_all, fields(sites = contexts.len()))]
    pub async fn initialize(
        contexts: Vec<SiteContext>,
        provider: &dyn SessionProvider,
        cancel: &CancellationToken,
    ) -> Self {
        let services: Vec<Arc<SiteService>> = contexts
            .into_iter()
            .map(|c| Arc::new(SiteService::new(c)))
            .collect();
        let results = join_all(services.iter().map(|s| s.initialize(provider, cancel))).await;

        let mut sites = Vec::new();
        for (service, res) in services.into_iter().zip(results) {
            match res {
                Ok(()) => sites.push(service),
                Err(err) => warn!(site = service.name(), error = %err, "site excluded"),
            }
        }
        info!(ready = sites.len(), "site services initialized");
        Self { sites }
    }

    pub fn from_services(sites: Vec<Arc<SiteService>>) -> Self {
        Self { sites }
    }

    pub fn sites(&self) -> &[Arc<SiteService>] {
        &self.sites
    }

    /// Looks a site up by name, then by URL, then by site GUID. Names and
    /// URLs compare case-insensitively, like list identities; an exact name
    /// match wins.
    pub fn get(&self, site: &str) -> Result<Arc<SiteService>> {
        let wanted_url = site.trim_end_matches('/');
        self.sites
            .iter()
            .find(|s| s.name() == site)
            .or_else(|| self.sites.iter().find(|s| s.name().eq_ignore_ascii_case(site)))
            .or_else(|| {
                self.sites.iter().find(|s| {
                    s.configured_url()
                        .trim_end_matches('/')
                        .eq_ignore_ascii_case(wanted_url)
                        || s.url().trim_end_matches('/').eq_ignore_ascii_case(wanted_url)
                })
            })
            .or_else(|| {
                crate::client::model::parse_braced_guid(site)
                    .and_then(|id| self.sites.iter().find(|s| s.id() == Some(id)))
            })
            .cloned()
            .ok_or_else(|| SharePointError::SiteNotConfigured(site.to_string()))
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<Arc<SiteService>> {
        self.sites.iter().find(|s| s.id() == Some(id)).cloned()
    }

    /// The only site, when exactly one is available.
    pub fn default_site(&self) -> Result<Arc<SiteService>> {
        match self.sites.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(SharePointError::config("no SharePoint site is available")),
            _ => Err(SharePointError::config(
                "more than one SharePoint site is available, a site name is required",
            )),
        }
    }

    pub async fn finalize(&self) {
        join_all(self.sites.iter().map(|s| s.finalize())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SiteAccountSettings, SiteSettings};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct IdleSession {
        keep_alives: AtomicUsize,
    }

    #[async_trait]
    impl SiteSession for IdleSession {
        async fn web(&self) -> anyhow::Result<WebInfo> {
            Ok(WebInfo {
                id: Uuid::nil(),
                title: "Alpha".into(),
                url: "https://contoso/sites/alpha".into(),
            })
        }
        async fn get_list(&self, _list: &ListRef) -> anyhow::Result<ListHandle> {
            Err(anyhow!("no lists"))
        }
        async fn get_list_schema(&self, _list: &ListRef) -> anyhow::Result<ListSchema> {
            Err(anyhow!("no lists"))
        }
        async fn get_list_items(
            &self,
            _list: &ListRef,
            _query: &ItemQuery,
        ) -> anyhow::Result<Vec<RawItem>> {
            std::future::pending().await
        }
        async fn update_list_item(
            &self,
            _list: &ListRef,
            _item_id: i64,
            _fields: &RawItem,
        ) -> anyhow::Result<i64> {
            Ok(1)
        }
        async fn upload_file(
            &self,
            _list: &ListRef,
            _item_id: i64,
            _folder: &str,
            _name: &str,
            _content: &[u8],
        ) -> anyhow::Result<i64> {
            Ok(1)
        }
        async fn keep_alive(&self) -> anyhow::Result<()> {
            self.keep_alives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Provider {
        session: Arc<IdleSession>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SessionProvider for Provider {
        async fn connect(
            &self,
            _site: &SiteSettings,
            _account: Option<&SiteAccountSettings>,
        ) -> anyhow::Result<Arc<dyn SiteSession>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("401 unauthorized"));
            }
            Ok(self.session.clone())
        }
    }

    fn provider(fail: bool) -> Provider {
        Provider {
            session: Arc::new(IdleSession {
                keep_alives: AtomicUsize::new(0),
            }),
            fail: AtomicBool::new(fail),
        }
    }

    fn context(name: &str) -> SiteContext {
        SiteContext {
            site_name: name.into(),
            settings: SiteSettings {
                site_url: format!("https://contoso/sites/{}", name),
                ..Default::default()
            },
            account: None,
            keep_alive: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn initialize_moves_to_ready() {
        let service = SiteService::new(context("alpha"));
        assert_eq!(service.state(), SiteState::Uninitialized);
        assert!(service.get_list("Docs", &CancellationToken::new()).await.is_err());

        service
            .initialize(&provider(false), &CancellationToken::new())
            .await
            .unwrap();
        assert!(service.is_ready());
        assert_eq!(service.id(), Some(Uuid::nil()));
        assert_eq!(service.title(), Some("Alpha"));

        // A second initialize is rejected.
        assert!(service
            .initialize(&provider(false), &CancellationToken::new())
            .await
            .is_err());

        service.finalize().await;
        assert_eq!(service.state(), SiteState::Finalized);
        assert!(service.session().is_err());
    }

    #[tokio::test]
    async fn failed_connect_is_terminal() {
        let service = SiteService::new(context("beta"));
        let err = service
            .initialize(&provider(true), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SharePointError::Connection { .. }));
        assert!(matches!(service.state(), SiteState::Failed(_)));
    }

    #[tokio::test]
    async fn missing_url_fails_initialization() {
        let mut ctx = context("gamma");
        ctx.settings.site_url.clear();
        let service = SiteService::new(ctx);
        let err = service
            .initialize(&provider(false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn cancellation_interrupts_calls() {
        let service = SiteService::new(context("alpha"));
        service
            .initialize(&provider(false), &CancellationToken::new())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .get_list_items("Docs", &ItemQuery::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SharePointError::Cancelled));
        assert_eq!(service.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_skips_while_busy() {
        let provider = provider(false);
        let service = Arc::new(SiteService::new(context("alpha")));
        service
            .initialize(&provider, &CancellationToken::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(provider.session.keep_alives.load(Ordering::SeqCst), 1);

        // A pending request blocks the probe.
        let busy = service.clone();
        let pending = tokio::spawn(async move {
            busy.get_list_items("Docs", &ItemQuery::default(), &CancellationToken::new())
                .await
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(provider.session.keep_alives.load(Ordering::SeqCst), 1);

        pending.abort();
        service.finalize().await;
    }

    #[tokio::test]
    async fn provider_skips_failed_sites_and_resolves_aliases() {
        struct Mixed(Provider, Provider);

        #[async_trait]
        impl SessionProvider for Mixed {
            async fn connect(
                &self,
                site: &SiteSettings,
                account: Option<&SiteAccountSettings>,
            ) -> anyhow::Result<Arc<dyn SiteSession>> {
                if site.site_url.ends_with("beta") {
                    self.1.connect(site, account).await
                } else {
                    self.0.connect(site, account).await
                }
            }
        }

        let mixed = Mixed(provider(false), provider(true));
        let sites = SiteServiceProvider::initialize(
            vec![context("alpha"), context("beta")],
            &mixed,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(sites.sites().len(), 1);
        assert_eq!(sites.get("alpha").unwrap().name(), "alpha");
        assert_eq!(sites.get("Alpha").unwrap().name(), "alpha");
        assert_eq!(
            sites.get("https://contoso/sites/alpha/").unwrap().name(),
            "alpha"
        );
        assert_eq!(
            sites.get("https://CONTOSO/sites/Alpha").unwrap().name(),
            "alpha"
        );
        assert_eq!(
            sites.get(&Uuid::nil().to_string()).unwrap().name(),
            "alpha"
        );
        assert!(matches!(
            sites.get("beta").unwrap_err(),
            SharePointError::SiteNotConfigured(_)
        ));
        assert_eq!(sites.default_site().unwrap().name(), "alpha");
        sites.finalize().await;
    }
}
