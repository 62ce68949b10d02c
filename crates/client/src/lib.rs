//! Typed HTTP client for the identity API.
//!
//! The access token and the refresh behaviour are injected at construction.
//! On a 401 the client asks its [`RefreshHandler`] to recover once; if that
//! succeeds the request is replayed exactly once, otherwise the 401 surfaces.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Supplies the current access token, if any.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// Attempts to obtain a fresh access token after a 401. Returns `true` on success.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn refresh(&self) -> bool;
}

/// In-memory token slot; usable as an [`IdentityProvider`] and updated by a refresh handler.
#[derive(Debug, Default)]
pub struct TokenCell {
    token: RwLock<Option<String>>,
}

impl TokenCell {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }
}

#[async_trait]
impl IdentityProvider for TokenCell {
    async fn access_token(&self) -> Option<String> {
        self.get()
    }
}

/// Refresh handler that never recovers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

#[async_trait]
impl RefreshHandler for NoRefresh {
    async fn refresh(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("parse error: {0}")]
    Parse(String),
}

impl ClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    refresher: Arc<dyn RefreshHandler>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, identity: Arc<dyn IdentityProvider>, refresher: Arc<dyn RefreshHandler>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, identity, refresher)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
        refresher: Arc<dyn RefreshHandler>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity,
            refresher,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }

    /// Send a request and decode the `data` member of the success envelope.
    pub async fn request<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let response = self.send(method.clone(), path, body).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED && self.refresher.refresh().await {
            debug!(%method, path, "retrying after refresh");
            self.send(method, path, body).await?
        } else {
            response
        };

        decode(response).await
    }

    async fn send<B: Serialize + ?Sized>(&self, method: Method, path: &str, body: Option<&B>) -> Result<reqwest::Response, ClientError> {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = self.identity.access_token().await {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| ClientError::Network(e.to_string()))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))?;

    if !status.is_success() {
        let field = |k: &str| body.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        return Err(ClientError::Api {
            status: status.as_u16(),
            code: field("code"),
            message: field("message"),
        });
    }

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|e| ClientError::Parse(e.to_string()))
}
