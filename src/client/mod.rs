use std::future::Future;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::record::{unwrap_rows, EntityKind, OwnerId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const MAX_ERROR_TEXT: usize = 300;

/// Remote store behind a collection view.
pub trait CollectionSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Raw rows for every record of `kind` owned by `owner`.
    fn fetch(
        &self,
        kind: EntityKind,
        owner: OwnerId,
    ) -> impl Future<Output = Result<Vec<Value>, Self::Error>> + Send;

    fn delete(&self, kind: EntityKind, id: i64)
        -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },

    #[error("failed to build http client: {source}")]
    ClientBuild {
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid proxy {proxy}: {source}")]
    ProxySetup {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl SourceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Human-readable failure text for a non-success response: the server's own
/// message when one can be found, else a generic status line.
pub fn error_text(status: StatusCode, body: &str) -> String {
    let fallback = || format!("Request failed (HTTP {})", status.as_u16());
    let raw = body.trim();
    if raw.is_empty() {
        return fallback();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => ["error", "message", "detail"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(fallback),
        Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Ok(_) => fallback(),
        Err(_) => raw.chars().take(MAX_ERROR_TEXT).collect(),
    }
}

/// List/delete path templates for one kind. `{owner}` and `{id}` are
/// substituted per request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointTemplates {
    pub list: String,
    pub delete: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    health_data: EndpointTemplates,
    assessment: EndpointTemplates,
    medication: EndpointTemplates,
}

impl Default for Endpoints {
    fn default() -> Self {
        let of = |kind: EntityKind| EndpointTemplates {
            list: kind.default_list_path().to_string(),
            delete: kind.default_delete_path().to_string(),
        };
        Self {
            health_data: of(EntityKind::HealthData),
            assessment: of(EntityKind::Assessment),
            medication: of(EntityKind::Medication),
        }
    }
}

impl Endpoints {
    pub fn get(&self, kind: EntityKind) -> &EndpointTemplates {
        match kind {
            EntityKind::HealthData => &self.health_data,
            EntityKind::Assessment => &self.assessment,
            EntityKind::Medication => &self.medication,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut EndpointTemplates {
        match kind {
            EntityKind::HealthData => &mut self.health_data,
            EntityKind::Assessment => &mut self.assessment,
            EntityKind::Medication => &mut self.medication,
        }
    }

    pub fn set(&mut self, kind: EntityKind, list: Option<String>, delete: Option<String>) {
        let slot = self.get_mut(kind);
        if let Some(list) = list.filter(|s| !s.trim().is_empty()) {
            slot.list = list;
        }
        if let Some(delete) = delete.filter(|s| !s.trim().is_empty()) {
            slot.delete = delete;
        }
    }

    pub fn list_path(&self, kind: EntityKind, owner: OwnerId) -> String {
        self.get(kind).list.replace("{owner}", &owner.to_string())
    }

    pub fn delete_path(&self, kind: EntityKind, id: i64) -> String {
        self.get(kind).delete.replace("{id}", &id.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
    pub endpoints: Endpoints,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            proxy: None,
            endpoints: Endpoints::default(),
        }
    }
}

fn build_http_client(proxy: Option<&str>, timeout_secs: u64) -> Result<reqwest::Client, SourceError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_static(concat!("healthmate/", env!("CARGO_PKG_VERSION"))),
    );

    let timeout = Duration::from_secs(if timeout_secs == 0 {
        DEFAULT_TIMEOUT_SECS
    } else {
        timeout_secs
    });
    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout);

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| SourceError::ProxySetup {
            proxy: proxy.to_string(),
            source: e,
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| SourceError::ClientBuild { source: e })
}

/// `CollectionSource` backed by the HealthMate REST API.
#[derive(Clone, Debug)]
pub struct HttpCollectionClient {
    http: reqwest::Client,
    base: Url,
    endpoints: Endpoints,
}

impl HttpCollectionClient {
    pub fn new(options: ClientOptions) -> Result<Self, SourceError> {
        let trimmed = options.base_url.trim().trim_end_matches('/');
        let base = Url::parse(trimmed).map_err(|_| SourceError::InvalidUrl {
            url: options.base_url.clone(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SourceError::InvalidUrl {
                url: options.base_url,
            });
        }
        let http = build_http_client(options.proxy.as_deref(), options.timeout_secs)?;
        Ok(Self {
            http,
            base,
            endpoints: options.endpoints,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|_| SourceError::InvalidUrl { url: joined })
    }

    async fn failure(url: &Url, response: reqwest::Response) -> SourceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(%url, status = status.as_u16(), "request rejected");
        SourceError::Status {
            status: status.as_u16(),
            message: error_text(status, &body),
        }
    }
}

impl CollectionSource for HttpCollectionClient {
    type Error = SourceError;

    async fn fetch(&self, kind: EntityKind, owner: OwnerId) -> Result<Vec<Value>, SourceError> {
        let url = self.url(&self.endpoints.list_path(kind, owner))?;
        debug!(%url, %kind, "GET");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Transport {
                url: url.to_string(),
                source: e,
            })?;
        if !response.status().is_success() {
            return Err(Self::failure(&url, response).await);
        }
        let bytes = response.bytes().await.map_err(|e| SourceError::Transport {
            url: url.to_string(),
            source: e,
        })?;
        let payload: Value = serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        unwrap_rows(payload).ok_or_else(|| SourceError::Decode {
            url: url.to_string(),
            detail: "expected a JSON array of records".to_string(),
        })
    }

    async fn delete(&self, kind: EntityKind, id: i64) -> Result<(), SourceError> {
        let url = self.url(&self.endpoints.delete_path(kind, id))?;
        debug!(%url, %kind, id, "DELETE");
        let response = self
            .http
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Transport {
                url: url.to_string(),
                source: e,
            })?;
        if !response.status().is_success() {
            return Err(Self::failure(&url, response).await);
        }
        Ok(())
    }
}
