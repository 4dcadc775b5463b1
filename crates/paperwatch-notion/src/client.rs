use paperwatch_common::SandboxClient;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::{NotionError, Result};
use crate::properties::plain_text;

pub const NOTION_BASE_URL: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
/// Largest `page_size` the query endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One database row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Page {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// One page of query results.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub results: Vec<Page>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Database {
    pub fn title_text(&self) -> String {
        plain_text(&Value::Array(self.title.clone()))
    }

    /// The Notion type of property `name` ("title", "rich_text", …).
    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|p| p["type"].as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Notion REST client bound to one integration token.
#[derive(Clone)]
pub struct NotionClient {
    base_url: String,
    token: SecretString,
    client: SandboxClient,
}

impl NotionClient {
    pub fn new(client: SandboxClient, base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let resp = builder
            .bearer_auth(self.token.expose_secret())
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(NotionError::RateLimited { retry_after });
        }

        let body = resp.text().await?;
        if !status.is_success() {
            let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match parsed {
                Some(e) => (e.code, e.message),
                None => (String::new(), body.chars().take(200).collect()),
            };
            return Err(NotionError::Api { status: status.as_u16(), code, message });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Run one page of a database query.
    #[instrument(skip(self, query), fields(cursor = ?query.start_cursor))]
    pub async fn query_database(&self, database_id: &str, query: &DatabaseQuery) -> Result<QueryPage> {
        let url = self.url(&format!("databases/{database_id}/query"));
        let page: QueryPage = self.send(self.client.post(&url)?.json(query)).await?;
        debug!(n = page.results.len(), has_more = page.has_more, "Notion query page");
        Ok(page)
    }

    /// Run a query to exhaustion, following `next_cursor`.
    pub async fn query_all(&self, database_id: &str, filter: Option<Value>) -> Result<Vec<Page>> {
        let mut query = DatabaseQuery {
            filter,
            start_cursor: None,
            page_size: Some(MAX_PAGE_SIZE),
        };
        let mut pages = Vec::new();
        loop {
            let batch = self.query_database(database_id, &query).await?;
            pages.extend(batch.results);
            match batch.next_cursor {
                Some(cursor) if batch.has_more => query.start_cursor = Some(cursor),
                _ => break,
            }
        }
        Ok(pages)
    }

    #[instrument(skip(self, properties))]
    pub async fn create_page(&self, database_id: &str, properties: Map<String, Value>) -> Result<Page> {
        let body = serde_json::json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.send(self.client.post(&self.url("pages"))?.json(&body)).await
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<Database> {
        let url = self.url(&format!("databases/{database_id}"));
        self.send(self.client.get(&url)?).await
    }

    /// Add or change property definitions. Existing properties not named in
    /// `properties` are left untouched.
    pub async fn update_database_properties(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<Database> {
        let url = self.url(&format!("databases/{database_id}"));
        let body = serde_json::json!({ "properties": properties });
        self.send(self.client.patch(&url)?.json(&body)).await
    }
}
