//! Notion database client.
//!
//! The synchronizer only needs three calls against a database: query by an
//! equality filter, create a page, and patch a page's properties. They are
//! expressed by the [`RemoteDatabase`] trait so pipelines can be exercised
//! against an in-process fake; [`NotionClient`] is the HTTP implementation.
//!
//! Every call is a single attempt. Failed calls surface as
//! [`IntakeSyncError::Network`] (transport or non-2xx) or
//! [`IntakeSyncError::Decode`] (unreadable body); callers decide what to skip.

pub mod properties;

use async_trait::async_trait;
use intakesync_shared::{IntakeSyncError, NotionConfig, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

pub use properties::PropertyMap;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("IntakeSync/", env!("CARGO_PKG_VERSION"));

/// How much of an error body to keep in error messages.
const ERROR_BODY_LIMIT: usize = 512;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Equality predicate on a number property.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberEquals {
    pub property: String,
    pub equals: i64,
}

impl NumberEquals {
    pub fn new(property: impl Into<String>, equals: i64) -> Self {
        Self {
            property: property.into(),
            equals,
        }
    }

    /// The `filter` object of a database query.
    pub fn to_json(&self) -> Value {
        json!({
            "property": self.property,
            "number": { "equals": self.equals },
        })
    }
}

/// A page as returned by the API. Fields other than the id are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePage {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<RemotePage>,
}

// ---------------------------------------------------------------------------
// RemoteDatabase
// ---------------------------------------------------------------------------

/// Operations the synchronizer performs against the remote store.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Pages in `database_id` matching `filter`. First page of results only.
    async fn query(&self, database_id: &str, filter: &NumberEquals) -> Result<Vec<RemotePage>>;

    /// Create a page under `database_id`.
    async fn create(&self, database_id: &str, properties: &PropertyMap) -> Result<RemotePage>;

    /// Overwrite the given properties of an existing page.
    async fn update(&self, page_id: &str, properties: &PropertyMap) -> Result<RemotePage>;
}

// ---------------------------------------------------------------------------
// NotionClient
// ---------------------------------------------------------------------------

/// HTTP client for the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionClient {
    config: NotionConfig,
    client: Client,
}

impl NotionClient {
    /// Build a client carrying the credential and version headers from `config`.
    pub fn new(config: NotionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.secret))
            .map_err(|_| IntakeSyncError::config("Notion secret contains invalid header characters"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            HeaderName::from_static("notion-version"),
            HeaderValue::from_str(&config.api_version).map_err(|_| {
                IntakeSyncError::config(format!("invalid Notion version '{}'", config.api_version))
            })?,
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| IntakeSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Send a JSON request and decode the JSON response.
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| IntakeSyncError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IntakeSyncError::Decode(format!("{url}: failed to read body: {e}")))?;
        debug!(%url, status = status.as_u16(), bytes = body.len(), "response received");

        if !status.is_success() {
            return Err(IntakeSyncError::Network(format!(
                "{url}: HTTP {status}: {}",
                truncate(&body, ERROR_BODY_LIMIT)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| IntakeSyncError::Decode(format!("{url}: invalid JSON body: {e}")))
    }
}

#[async_trait]
impl RemoteDatabase for NotionClient {
    #[instrument(skip_all, fields(%database_id, property = %filter.property, equals = filter.equals))]
    async fn query(&self, database_id: &str, filter: &NumberEquals) -> Result<Vec<RemotePage>> {
        let url = self.config.endpoint(&format!("databases/{database_id}/query"));
        let payload = json!({ "filter": filter.to_json() });
        debug!(%url, %payload, "querying database");

        let body = self.send(self.client.post(&url).json(&payload), &url).await?;
        let parsed: QueryResponse = serde_json::from_value(body)
            .map_err(|e| IntakeSyncError::Decode(format!("{url}: unexpected query response: {e}")))?;
        Ok(parsed.results)
    }

    #[instrument(skip_all, fields(%database_id))]
    async fn create(&self, database_id: &str, properties: &PropertyMap) -> Result<RemotePage> {
        let url = self.config.endpoint("pages");
        let payload = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        debug!(%url, %payload, "creating page");

        let body = self.send(self.client.post(&url).json(&payload), &url).await?;
        decode_page(body, &url)
    }

    #[instrument(skip_all, fields(%page_id))]
    async fn update(&self, page_id: &str, properties: &PropertyMap) -> Result<RemotePage> {
        let url = self.config.endpoint(&format!("pages/{page_id}"));
        let payload = json!({ "properties": properties });
        debug!(%url, %payload, "updating page");

        let body = self.send(self.client.patch(&url).json(&payload), &url).await?;
        decode_page(body, &url)
    }
}

fn decode_page(body: Value, url: &str) -> Result<RemotePage> {
    serde_json::from_value(body)
        .map_err(|e| IntakeSyncError::Decode(format!("{url}: unexpected page response: {e}")))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intakesync_shared::NotionSettings;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NotionClient {
        let settings = NotionSettings {
            database_id: "db1".into(),
            base_url: server.uri(),
            timeout_secs: 5,
            ..NotionSettings::default()
        };
        let config = NotionConfig::from_settings(&settings, "secret_test").expect("config");
        NotionClient::new(config).expect("client")
    }

    #[test]
    fn filter_json_shape() {
        let f = NumberEquals::new("ID", 3);
        assert_eq!(
            f.to_json(),
            json!({ "property": "ID", "number": { "equals": 3 } })
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn query_sends_filter_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(header("authorization", "Bearer secret_test"))
            .and(header("notion-version", "2022-06-28"))
            .and(body_json(json!({
                "filter": { "property": "ID", "number": { "equals": 7 } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "results": [{ "object": "page", "id": "page-7" }],
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let pages = client
            .query("db1", &NumberEquals::new("ID", 7))
            .await
            .expect("query");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, "page-7");
    }

    #[tokio::test]
    async fn query_without_results_key_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "object": "list" })))
            .mount(&server)
            .await;

        let pages = client_for(&server)
            .query("db1", &NumberEquals::new("ID", 1))
            .await
            .expect("query");
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn create_posts_parent_and_properties() {
        let server = MockServer::start().await;
        let mut props = PropertyMap::new();
        props.insert("ID".into(), properties::integer(3));

        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(body_json(json!({
                "parent": { "database_id": "db1" },
                "properties": { "ID": { "number": 3 } },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "new-page" })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).create("db1", &props).await.expect("create");
        assert_eq!(page.id, "new-page");
    }

    #[tokio::test]
    async fn update_patches_page() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/pages/page-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "page-3" })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server)
            .update("page-3", &PropertyMap::new())
            .await
            .expect("update");
        assert_eq!(page.id, "page-3");
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pages"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"message":"validation_error"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create("db1", &PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeSyncError::Network(_)));
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("validation_error"));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .query("db1", &NumberEquals::new("ID", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeSyncError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        drop(server);

        let err = client
            .query("db1", &NumberEquals::new("ID", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeSyncError::Network(_)));
    }
}
