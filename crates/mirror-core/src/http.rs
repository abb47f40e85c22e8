//! HTTP client for a hosted deployment's function API.
//!
//! Queries go to `POST {url}/api/query`, mutations to `POST {url}/api/mutation`.
//! Both take `{"path", "args", "format": "json"}` and answer with
//! `{"status": "success", "value": ...}` or `{"status": "error", "errorMessage": ...}`.

use crate::connection::ClientFactory;
use crate::document::DocumentRecord;
use crate::remote::{RemoteClient, RemoteError, Result, functions};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a single request, so a hung write eventually fails.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct FunctionRequest<'a> {
    path: &'a str,
    args: Value,
    format: &'static str,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum FunctionResponse {
    Success {
        value: Value,
    },
    Error {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

#[derive(Clone, Copy)]
enum CallKind {
    Query,
    Mutation,
}

impl CallKind {
    fn endpoint(self) -> &'static str {
        match self {
            CallKind::Query => "api/query",
            CallKind::Mutation => "api/mutation",
        }
    }
}

/// Client for a deployment reachable over HTTP(S).
pub struct ConvexHttpClient {
    http: Client,
    base_url: Url,
}

impl ConvexHttpClient {
    /// Build a client for `deployment_url`.
    ///
    /// Fails if the URL doesn't parse or isn't http/https. No request is made.
    pub fn new(deployment_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(deployment_url.trim())
            .map_err(|e| RemoteError::InvalidUrl(format!("{deployment_url}: {e}")))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RemoteError::InvalidUrl(format!(
                "{deployment_url}: unsupported scheme '{}'",
                base_url.scheme()
            )));
        }

        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(&self, kind: CallKind, function: &str, args: Value) -> Result<T> {
        let url = self
            .base_url
            .join(kind.endpoint())
            .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;

        debug!("POST {} ({})", url, function);

        let response = self
            .http
            .post(url)
            .json(&FunctionRequest {
                path: function,
                args,
                format: "json",
            })
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RemoteError::Transport(format!("HTTP {status}: {body}")));
        }

        let parsed: FunctionResponse =
            serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;

        match parsed {
            FunctionResponse::Success { value } => {
                serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
            }
            FunctionResponse::Error { error_message } => Err(RemoteError::Server(error_message)),
        }
    }
}

#[async_trait]
impl RemoteClient for ConvexHttpClient {
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        // A deployment with no table yet may answer null
        let records: Option<Vec<DocumentRecord>> = self
            .call(CallKind::Query, functions::LIST_DOCUMENTS, json!({}))
            .await?;
        Ok(records.unwrap_or_default())
    }

    async fn get_document(&self, path: &str) -> Result<Option<DocumentRecord>> {
        self.call(CallKind::Query, functions::GET_DOCUMENT, json!({ "path": path }))
            .await
    }

    async fn save_document(&self, path: &str, content: &str) -> Result<()> {
        let _: Value = self
            .call(
                CallKind::Mutation,
                functions::SAVE_DOCUMENT,
                json!({ "path": path, "content": content }),
            )
            .await?;
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        let _: Value = self
            .call(CallKind::Mutation, functions::DELETE_DOCUMENT, json!({ "path": path }))
            .await?;
        Ok(())
    }
}

/// Builds `ConvexHttpClient`s for the connection slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn connect(&self, url: &str) -> Result<Arc<dyn RemoteClient>> {
        let client: Arc<dyn RemoteClient> = Arc::new(ConvexHttpClient::new(url)?);
        Ok(client)
    }
}
