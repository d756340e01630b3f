//! Raw SharePoint session boundary.
//!
//! [`SessionProvider`] authenticates against a site and hands out a
//! [`SiteSession`]; everything above this module talks to SharePoint only
//! through these two traits. [`RestSessionProvider`] is the default
//! implementation over the SharePoint REST API.
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{SiteAccountSettings, SiteSettings};
use crate::credential::SiteCredential;
use crate::error::SharePointError;

pub mod model;

use model::{ContextInfoResp, CreatedItemResp, FieldResp, ItemsResp, ListResp, WebResp};

const ODATA_JSON: &str = "application/json;odata=nometadata";

pub type RawItem = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebInfo {
    pub id: Uuid,
    pub title: String,
    pub url: String,
}

/// A list addressed by title or by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListRef {
    Title(String),
    Id(Uuid),
}

impl ListRef {
    /// A GUID addresses a list by id; a `site/list` full name is reduced to
    /// its list fragment; anything else is a title.
    pub fn parse(name_or_id: &str) -> Self {
        let trimmed = name_or_id.trim();
        if let Some(id) = model::parse_braced_guid(trimmed) {
            return ListRef::Id(id);
        }
        let title = match trimmed.rfind('/') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        };
        ListRef::Title(title.to_string())
    }
}

impl fmt::Display for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListRef::Title(t) => write!(f, "'{}'", t),
            ListRef::Id(id) => write!(f, "{{{}}}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListHandle {
    pub id: Uuid,
    pub title: String,
    pub base_type: i32,
    pub root_folder: Option<String>,
}

/// A field definition as returned by SharePoint, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub internal_name: String,
    pub title: String,
    pub type_kind: i32,
    pub read_only: bool,
    pub hidden: bool,
    pub lookup_list: Option<Uuid>,
    pub lookup_web_id: Option<Uuid>,
    pub lookup_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSchema {
    pub list: ListHandle,
    pub fields: Vec<FieldSchema>,
}

/// OData item query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub top: Option<u32>,
}

#[async_trait]
pub trait SiteSession: Send + Sync {
    async fn web(&self) -> Result<WebInfo>;

    async fn get_list(&self, list: &ListRef) -> Result<ListHandle>;

    /// List properties and field definitions in one round-trip.
    async fn get_list_schema(&self, list: &ListRef) -> Result<ListSchema>;

    async fn get_list_items(&self, list: &ListRef, query: &ItemQuery) -> Result<Vec<RawItem>>;

    /// Creates the item when `item_id` is 0, merges the fields otherwise.
    /// Returns the item id.
    async fn update_list_item(&self, list: &ListRef, item_id: i64, fields: &RawItem)
        -> Result<i64>;

    /// Stores a document's content as `name` in the server-relative `folder`
    /// of a document library. Adds the file when `item_id` is 0, replaces the
    /// content of the item's file otherwise. Returns the item id.
    async fn upload_file(
        &self,
        list: &ListRef,
        item_id: i64,
        folder: &str,
        name: &str,
        content: &[u8],
    ) -> Result<i64>;

    /// Trivial read used to keep an idle session from expiring.
    async fn keep_alive(&self) -> Result<()>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(
        &self,
        site: &SiteSettings,
        account: Option<&SiteAccountSettings>,
    ) -> Result<Arc<dyn SiteSession>>;
}

/// Connects [`RestSession`]s. Only password credentials are supported.
#[derive(Debug, Clone)]
pub struct RestSessionProvider {
    user_agent: String,
}

impl RestSessionProvider {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for RestSessionProvider {
    async fn connect(
        &self,
        site: &SiteSettings,
        account: Option<&SiteAccountSettings>,
    ) -> Result<Arc<dyn SiteSession>> {
        let credential = site
            .credential
            .as_ref()
            .or_else(|| account.and_then(|a| a.credential.as_ref()))
            .ok_or_else(|| {
                anyhow!(
                    "the credential setting is missing, cannot connect to '{}'",
                    site.site_url
                )
            })?;
        let base_url = site_base_url(&site.site_url)?;
        let session = RestSession::new(base_url, &self.user_agent, credential)?;

        match session.web().await {
            Ok(web) => debug!(site_id = %web.id, url = %web.url, "connected"),
            Err(err) if is_unauthorized(&err) => {
                return Err(err.context(format!(
                    "cannot connect to SharePoint site '{}' with '{}', check whether the credentials are correct",
                    site.site_url, credential
                )))
            }
            Err(err) => return Err(err),
        }
        Ok(Arc::new(session))
    }
}

#[derive(Debug)]
struct HttpStatusError {
    status: StatusCode,
    body: String,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sharepoint error {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpStatusError {}

fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HttpStatusError>()
        .map(|e| e.status == StatusCode::UNAUTHORIZED)
        .unwrap_or(false)
}

fn site_base_url(site_url: &str) -> Result<Url> {
    let trimmed = site_url.trim();
    if trimmed.is_empty() {
        bail!("site URL is empty");
    }
    let normalized = format!("{}/", trimmed.trim_end_matches('/'));
    Url::parse(&normalized).with_context(|| format!("invalid site URL '{}'", site_url))
}

#[derive(Clone)]
pub struct RestSession {
    http: Client,
    base_url: Url,
    user_name: String,
    password: Option<String>,
}

impl fmt::Debug for RestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSession")
            .field("base_url", &self.base_url)
            .field("user_name", &self.user_name)
            .finish_non_exhaustive()
    }
}

impl RestSession {
    pub fn new(base_url: Url, user_agent: &str, credential: &SiteCredential) -> Result<Self> {
        let (user_name, password) = match credential {
            SiteCredential::Password(c) => (c.user_name.clone(), c.user_password.clone()),
            other => {
                return Err(SharePointError::UnsupportedCredential(other.kind().to_string()).into())
            }
        };
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            user_name,
            password,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid SharePoint endpoint '{}'", path))
    }

    fn list_path(list: &ListRef) -> String {
        match list {
            ListRef::Title(title) => {
                format!("_api/web/lists/getbytitle('{}')", title.replace('\'', "''"))
            }
            ListRef::Id(id) => format!("_api/web/lists(guid'{}')", id),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.user_name, self.password.as_deref())
            .header(ACCEPT, ODATA_JSON)
    }

    /// Builds an authenticated GET without sending it.
    pub fn build_get(&self, path: &str) -> Result<reqwest::Request> {
        let url = self.endpoint(path)?;
        self.authorize(self.http.get(url))
            .build()
            .context("failed to build SharePoint request")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        let res = builder.send().await.context("failed to reach SharePoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(HttpStatusError { status, body }.into());
        }
        Ok(res)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "sharepoint GET");
        let res = self.send(self.authorize(self.http.get(url))).await?;
        res.json::<T>().await.context("invalid SharePoint response")
    }

    async fn form_digest(&self) -> Result<String> {
        let url = self.endpoint("_api/contextinfo")?;
        let res = self.send(self.authorize(self.http.post(url))).await?;
        let info: ContextInfoResp = res
            .json()
            .await
            .context("invalid context info response")?;
        Ok(info.form_digest_value)
    }

    async fn fetch_list(&self, list: &ListRef, expand_fields: bool) -> Result<ListResp> {
        let expand = if expand_fields {
            "RootFolder,Fields"
        } else {
            "RootFolder"
        };
        let path = format!("{}?$expand={}", Self::list_path(list), expand);
        let url = self.endpoint(&path)?;
        match self.get_json::<ListResp>(url).await {
            Err(err)
                if err
                    .downcast_ref::<HttpStatusError>()
                    .map(|e| e.status == StatusCode::NOT_FOUND)
                    .unwrap_or(false) =>
            {
                debug!(error = %format!("{:#}", err), "list lookup failed");
                Err(SharePointError::ListNotFound(list.to_string()).into())
            }
            other => other,
        }
    }
}

fn to_handle(resp: &ListResp) -> ListHandle {
    ListHandle {
        id: resp.id,
        title: resp.title.clone(),
        base_type: resp.base_type,
        root_folder: resp
            .root_folder
            .as_ref()
            .map(|f| f.server_relative_url.clone()),
    }
}

fn to_field_schema(field: FieldResp) -> FieldSchema {
    FieldSchema {
        lookup_list: field.lookup_list.as_deref().and_then(model::parse_braced_guid),
        internal_name: field.internal_name,
        title: field.title,
        type_kind: field.field_type_kind,
        read_only: field.read_only_field,
        hidden: field.hidden,
        lookup_web_id: field.lookup_web_id,
        lookup_field: field.lookup_field.filter(|f| !f.is_empty()),
    }
}

#[async_trait]
impl SiteSession for RestSession {
    async fn web(&self) -> Result<WebInfo> {
        let url = self.endpoint("_api/web?$select=Id,Title,Url")?;
        let web: WebResp = self.get_json(url).await?;
        Ok(WebInfo {
            id: web.id,
            title: web.title,
            url: web.url,
        })
    }

    async fn get_list(&self, list: &ListRef) -> Result<ListHandle> {
        let resp = self.fetch_list(list, false).await?;
        Ok(to_handle(&resp))
    }

    async fn get_list_schema(&self, list: &ListRef) -> Result<ListSchema> {
        let mut resp = self.fetch_list(list, true).await?;
        let fields = std::mem::take(&mut resp.fields)
            .into_iter()
            .map(to_field_schema)
            .collect();
        Ok(ListSchema {
            list: to_handle(&resp),
            fields,
        })
    }

    async fn get_list_items(&self, list: &ListRef, query: &ItemQuery) -> Result<Vec<RawItem>> {
        let mut url = self.endpoint(&format!("{}/items", Self::list_path(list)))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(filter) = query.filter.as_deref().filter(|f| !f.is_empty()) {
                pairs.append_pair("$filter", filter);
            }
            if !query.select.is_empty() {
                pairs.append_pair("$select", &query.select.join(","));
            }
            if let Some(top) = query.top {
                pairs.append_pair("$top", &top.to_string());
            }
        }
        let items: ItemsResp = self.get_json(url).await?;
        Ok(items.value)
    }

    async fn update_list_item(
        &self,
        list: &ListRef,
        item_id: i64,
        fields: &RawItem,
    ) -> Result<i64> {
        let digest = self.form_digest().await?;
        if item_id == 0 {
            let url = self.endpoint(&format!("{}/items", Self::list_path(list)))?;
            debug!(%url, "sharepoint create item");
            let builder = self
                .authorize(self.http.post(url))
                .header(CONTENT_TYPE, ODATA_JSON)
                .header("X-RequestDigest", digest)
                .json(fields);
            let created: CreatedItemResp = self
                .send(builder)
                .await?
                .json()
                .await
                .context("invalid create item response")?;
            return Ok(created.id);
        }

        let url = self.endpoint(&format!("{}/items({})", Self::list_path(list), item_id))?;
        debug!(%url, "sharepoint merge item");
        let builder = self
            .authorize(self.http.post(url))
            .header(CONTENT_TYPE, ODATA_JSON)
            .header("X-RequestDigest", digest)
            .header("X-HTTP-Method", "MERGE")
            .header("IF-MATCH", "*")
            .json(fields);
        self.send(builder).await?;
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
        let digest = self.form_digest().await?;
        if item_id != 0 {
            let url = self.endpoint(&format!(
                "{}/items({})/File/$value",
                Self::list_path(list),
                item_id
            ))?;
            debug!(%url, size = content.len(), "sharepoint replace file");
            let builder = self
                .authorize(self.http.post(url))
                .header("X-RequestDigest", digest)
                .header("X-HTTP-Method", "PUT")
                .body(content.to_vec());
            self.send(builder).await?;
            return Ok(item_id);
        }

        let folder = folder.trim_end_matches('/').replace('\'', "''");
        let name = name.replace('\'', "''");
        let url = self.endpoint(&format!(
            "_api/web/GetFolderByServerRelativeUrl('{}')/Files/add(url='{}',overwrite=true)",
            folder, name
        ))?;
        debug!(%url, size = content.len(), "sharepoint add file");
        let builder = self
            .authorize(self.http.post(url))
            .header("X-RequestDigest", digest)
            .body(content.to_vec());
        self.send(builder).await?;

        let url = self.endpoint(&format!(
            "_api/web/GetFileByServerRelativeUrl('{}/{}')/ListItemAllFields?$select=Id",
            folder, name
        ))?;
        let item: CreatedItemResp = self
            .get_json(url)
            .await
            .context("cannot read the list item of the uploaded file")?;
        Ok(item.id)
    }

    async fn keep_alive(&self) -> Result<()> {
        let url = self.endpoint("_api/web?$select=Title")?;
        let _: Value = self.get_json(url).await?;
        Ok(())
    }
}
