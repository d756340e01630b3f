mod common;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{docs_list, FakeProvider, RecordingSession};
use sharepoint_sync::client::ListRef;
use sharepoint_sync::metadata::{FieldKind, ListKey, MetadataCache};
use sharepoint_sync::names::ListNameResolver;
use sharepoint_sync::settings::SiteSettingsStore;
use sharepoint_sync::site::SiteServiceProvider;
use sharepoint_sync::SharePointError;

async fn setup() -> (MetadataCache, RecordingSession) {
    let cfg = common::config();
    let session = RecordingSession::new("alpha", vec![docs_list()]);
    let provider = FakeProvider::default()
        .with_site(session.clone())
        .rejecting("https://contoso.sharepoint.com/sites/beta");
    let store = SiteSettingsStore::new(cfg.sharepoint.clone());
    let sites = SiteServiceProvider::initialize(
        store.site_contexts(cfg.app.keep_alive()),
        &provider,
        &CancellationToken::new(),
    )
    .await;
    let cache = MetadataCache::new(
        Arc::new(sites),
        ListNameResolver::new(&cfg.sharepoint.defaults),
    );
    (cache, session)
}

#[tokio::test]
async fn miss_fetches_once_then_hits() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();

    let info = cache
        .get_list_info(&ListKey::full_name("alpha/Docs"), &cancel)
        .await
        .unwrap();
    assert_eq!(info.full_name(), "alpha/Docs");
    assert_eq!(info.site_id, Some(session.web.id));
    assert!(info.field("City").unwrap().kind.is_lookup());
    assert_eq!(info.field("Amount").unwrap().kind, FieldKind::Number);

    let again = cache
        .get_list_info(&ListKey::full_name("ALPHA/docs"), &cancel)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&info, &again));
    assert_eq!(session.schema_calls().await, vec![ListRef::Title("Docs".into())]);
}

#[tokio::test]
async fn cold_lookup_ignores_site_name_case() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();

    let info = cache
        .get_list_info(&ListKey::full_name("ALPHA/docs"), &cancel)
        .await
        .unwrap();
    assert_eq!(info.full_name(), "alpha/Docs");
    let again = cache
        .get_list_info(&ListKey::site_list("Alpha", "Docs"), &cancel)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&info, &again));
    assert_eq!(session.schema_calls().await.len(), 1);
}

#[tokio::test]
async fn every_alias_hits_the_same_entry() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();
    let list_id = session.list("Docs").list.id;

    // A bare list name resolves against the default site.
    let info = cache
        .get_list_info(&ListKey::full_name("Docs"), &cancel)
        .await
        .unwrap();

    let keys = [
        ListKey::site_list("alpha", "Docs"),
        ListKey::site_list("https://contoso.sharepoint.com/sites/alpha", "Docs"),
        ListKey::site_list(session.web.id.to_string(), list_id.to_string()),
        ListKey::site_list("alpha", list_id.to_string()),
        ListKey::Ids {
            site_id: session.web.id,
            list_id,
        },
    ];
    for key in &keys {
        let hit = cache.get_list_info(key, &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&info, &hit), "{:?} missed", key);
    }
    assert_eq!(session.schema_calls().await.len(), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn concurrent_misses_share_one_instance() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();

    let by_name = ListKey::full_name("alpha/Docs");
    let by_url = ListKey::site_list("https://contoso.sharepoint.com/sites/alpha", "Docs");
    let (a, b) = tokio::join!(
        cache.get_list_info(&by_name, &cancel),
        cache.get_list_info(&by_url, &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);
    // Both callers fetched; only the first insert was kept.
    assert_eq!(session.schema_calls().await.len(), 2);

    // The losing caller's aliases were merged into the winner.
    cache
        .get_list_info(&by_url, &cancel)
        .await
        .unwrap();
    assert_eq!(session.schema_calls().await.len(), 2);
}

#[tokio::test]
async fn invalidate_triggers_exactly_one_refetch() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();
    let key = ListKey::full_name("alpha/Docs");

    let first = cache.get_list_info(&key, &cancel).await.unwrap();
    assert!(cache
        .invalidate(&ListKey::site_list("alpha", "docs"))
        .unwrap());
    assert!(cache.is_empty());

    let second = cache.get_list_info(&key, &cancel).await.unwrap();
    let third = cache.get_list_info(&key, &cancel).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(session.schema_calls().await.len(), 2);

    // Nothing left to remove for an unknown list.
    assert!(!cache.invalidate(&ListKey::full_name("alpha/Other")).unwrap());
}

#[tokio::test]
async fn clear_makes_every_lookup_miss() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();
    let key = ListKey::full_name("alpha/Docs");

    cache.get_list_info(&key, &cancel).await.unwrap();
    cache.clear();
    assert!(cache.is_empty());
    cache.get_list_info(&key, &cancel).await.unwrap();
    assert_eq!(session.schema_calls().await.len(), 2);
}

#[tokio::test]
async fn failed_fetch_is_not_cached() {
    let (cache, session) = setup().await;
    let cancel = CancellationToken::new();
    let key = ListKey::full_name("alpha/Docs");

    session.fail_schema(true).await;
    let err = cache.get_list_info(&key, &cancel).await.unwrap_err();
    assert!(format!("{:#}", err).contains("connection reset"));
    assert!(cache.is_empty());

    session.fail_schema(false).await;
    cache.get_list_info(&key, &cancel).await.unwrap();
    assert_eq!(session.schema_calls().await.len(), 2);
}

#[tokio::test]
async fn unknown_or_failed_sites_are_not_configured() {
    let (cache, _session) = setup().await;
    let cancel = CancellationToken::new();

    for name in ["beta/Docs", "gamma/Docs"] {
        let err = cache
            .get_list_info(&ListKey::full_name(name), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SharePointError::SiteNotConfigured(_)), "{}", err);
    }
}

#[tokio::test]
async fn cancelled_lookup_leaves_no_entry() {
    let (cache, _session) = setup().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = cache
        .get_list_info(&ListKey::full_name("alpha/Docs"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SharePointError::Cancelled));
    assert!(cache.is_empty());
}
