//! Recording fakes for the raw session boundary.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use sharepoint_sync::client::{
    FieldSchema, ItemQuery, ListHandle, ListRef, ListSchema, RawItem, SessionProvider, SiteSession,
    WebInfo,
};
use sharepoint_sync::config::{self, Config, SiteAccountSettings, SiteSettings};

pub const CONFIG: &str = r#"
app:
  keep_alive_seconds: 300
sharepoint:
  accounts:
    service:
      credential:
        password: "sync@contoso,secret"
    wrong:
      credential:
        password: "sync@contoso,wrong"
  sites:
    alpha:
      site_url: "https://contoso.sharepoint.com/sites/alpha"
      account: service
    beta:
      site_url: "https://contoso.sharepoint.com/sites/beta"
      account: wrong
  defaults:
    site: alpha
    library: Docs
    fields:
      Department: "Sales"
"#;

pub fn config() -> Config {
    config::parse(CONFIG).unwrap()
}

pub fn field(name: &str, type_kind: i32) -> FieldSchema {
    FieldSchema {
        internal_name: name.to_string(),
        title: name.to_string(),
        type_kind,
        read_only: false,
        hidden: false,
        lookup_list: None,
        lookup_web_id: None,
        lookup_field: None,
    }
}

pub fn read_only(mut field: FieldSchema) -> FieldSchema {
    field.read_only = true;
    field
}

pub fn list(title: &str, fields: Vec<FieldSchema>) -> ListSchema {
    ListSchema {
        list: ListHandle {
            id: Uuid::new_v4(),
            title: title.to_string(),
            base_type: 1,
            root_folder: Some(format!("/sites/alpha/{}", title)),
        },
        fields,
    }
}

/// The `Docs` library every fake site serves.
pub fn docs_list() -> ListSchema {
    list(
        "Docs",
        vec![
            field("Title", 2),
            field("Department", 2),
            field("Amount", 9),
            field("City", 7),
            field("SyncID", 2),
            field("SyncTool", 2),
            read_only(field("Modified", 4)),
        ],
    )
}

/// A generic list without the configured default or document columns.
pub fn tasks_list() -> ListSchema {
    let mut tasks = list("Tasks", vec![field("Title", 2), field("SyncID", 2)]);
    tasks.list.base_type = 0;
    tasks
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCall {
    pub list: ListRef,
    pub item_id: i64,
    pub folder: String,
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    pub list: ListRef,
    pub item_id: i64,
    pub fields: RawItem,
}

#[derive(Clone)]
pub struct RecordingSession {
    pub web: WebInfo,
    lists: Arc<Vec<ListSchema>>,
    items: Arc<Mutex<Vec<RawItem>>>,
    schema_delay: Duration,
    fail_schema: Arc<Mutex<bool>>,
    next_id: Arc<AtomicI64>,
    pub schema_calls: Arc<Mutex<Vec<ListRef>>>,
    pub item_queries: Arc<Mutex<Vec<ItemQuery>>>,
    pub updates: Arc<Mutex<Vec<UpdateCall>>>,
    pub uploads: Arc<Mutex<Vec<UploadCall>>>,
    pub keep_alives: Arc<Mutex<usize>>,
}

impl RecordingSession {
    pub fn new(site: &str, lists: Vec<ListSchema>) -> Self {
        Self {
            web: WebInfo {
                id: Uuid::new_v4(),
                title: site.to_uppercase(),
                url: format!("https://contoso.sharepoint.com/sites/{}", site),
            },
            lists: Arc::new(lists),
            items: Arc::new(Mutex::new(Vec::new())),
            schema_delay: Duration::from_millis(10),
            fail_schema: Arc::new(Mutex::new(false)),
            next_id: Arc::new(AtomicI64::new(100)),
            schema_calls: Arc::new(Mutex::new(Vec::new())),
            item_queries: Arc::new(Mutex::new(Vec::new())),
            updates: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            keep_alives: Arc::new(Mutex::new(0)),
        }
    }

    pub fn list(&self, title: &str) -> &ListSchema {
        self.lists
            .iter()
            .find(|l| l.list.title == title)
            .unwrap()
    }

    pub async fn set_items(&self, items: Vec<Value>) {
        *self.items.lock().await = items
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("not an object: {}", other),
            })
            .collect();
    }

    pub async fn fail_schema(&self, fail: bool) {
        *self.fail_schema.lock().await = fail;
    }

    pub async fn schema_calls(&self) -> Vec<ListRef> {
        self.schema_calls.lock().await.clone()
    }

    pub async fn updates(&self) -> Vec<UpdateCall> {
        self.updates.lock().await.clone()
    }

    pub async fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().await.clone()
    }

    fn find(&self, list: &ListRef) -> Result<&ListSchema> {
        self.lists
            .iter()
            .find(|l| match list {
                ListRef::Title(t) => l.list.title.eq_ignore_ascii_case(t),
                ListRef::Id(id) => l.list.id == *id,
            })
            .ok_or_else(|| anyhow!("list {} does not exist", list))
    }
}

#[async_trait]
impl SiteSession for RecordingSession {
    async fn web(&self) -> Result<WebInfo> {
        Ok(self.web.clone())
    }

    async fn get_list(&self, list: &ListRef) -> Result<ListHandle> {
        Ok(self.find(list)?.list.clone())
    }

    async fn get_list_schema(&self, list: &ListRef) -> Result<ListSchema> {
        self.schema_calls.lock().await.push(list.clone());
        tokio::time::sleep(self.schema_delay).await;
        if *self.fail_schema.lock().await {
            return Err(anyhow!("connection reset"));
        }
        Ok(self.find(list)?.clone())
    }

    async fn get_list_items(&self, list: &ListRef, query: &ItemQuery) -> Result<Vec<RawItem>> {
        self.find(list)?;
        self.item_queries.lock().await.push(query.clone());
        let items = self.items.lock().await.clone();
        Ok(match query.top {
            Some(top) => items.into_iter().take(top as usize).collect(),
            None => items,
        })
    }

    async fn update_list_item(&self, list: &ListRef, item_id: i64, fields: &RawItem) -> Result<i64> {
        self.find(list)?;
        self.updates.lock().await.push(UpdateCall {
            list: list.clone(),
            item_id,
            fields: fields.clone(),
        });
        if item_id == 0 {
            return Ok(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        Ok(item_id)
    }

    async fn upload_file(
        &self,
        list: &ListRef,
        item_id: i64,
        folder: &str,
        name: &str,
        content: &[u8],
    ) -> Result<i64> {
        self.find(list)?;
        self.uploads.lock().await.push(UploadCall {
            list: list.clone(),
            item_id,
            folder: folder.to_string(),
            name: name.to_string(),
            content: content.to_vec(),
        });
        if item_id == 0 {
            return Ok(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        Ok(item_id)
    }

    async fn keep_alive(&self) -> Result<()> {
        *self.keep_alives.lock().await += 1;
        Ok(())
    }
}

/// Serves one [`RecordingSession`] per site URL; URLs listed in `rejected`
/// fail to connect.
#[derive(Clone, Default)]
pub struct FakeProvider {
    sessions: HashMap<String, RecordingSession>,
    rejected: Vec<String>,
    pub connects: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub fn with_site(mut self, session: RecordingSession) -> Self {
        self.sessions.insert(session.web.url.clone(), session);
        self
    }

    pub fn rejecting(mut self, url: &str) -> Self {
        self.rejected.push(url.to_string());
        self
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn connect(
        &self,
        site: &SiteSettings,
        _account: Option<&SiteAccountSettings>,
    ) -> Result<Arc<dyn SiteSession>> {
        self.connects.lock().await.push(site.site_url.clone());
        if self.rejected.contains(&site.site_url) {
            return Err(anyhow!(
                "cannot connect to SharePoint site '{}', check whether the credentials are correct",
                site.site_url
            ));
        }
        let session = self
            .sessions
            .get(&site.site_url)
            .cloned()
            .ok_or_else(|| anyhow!("unreachable site {}", site.site_url))?;
        Ok(Arc::new(session))
    }
}

pub fn raw(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

pub fn lookup(id: i64) -> Value {
    json!({ "lookup_id": id })
}
