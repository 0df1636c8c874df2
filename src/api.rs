//! Management API collaborator.
//!
//! The api-call execution context goes through this trait; domain managers
//! inject whatever client their deployment uses. `HttpManagementApi` is the
//! standard HTTP implementation.

use async_trait::async_trait;

use crate::error::ApiError;

/// An authenticated client against the external management API.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Issue a request and return the decoded JSON response.
    async fn request(
        &self,
        method: &str,
        path: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError>;
}

/// HTTP implementation of [`ManagementApi`] using a bearer token.
pub struct HttpManagementApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpManagementApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Attach a bearer token used on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn request(
        &self,
        method: &str,
        path: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ApiError> {
        let http_method: reqwest::Method =
            method.to_uppercase().parse().map_err(|_| ApiError::RequestFailed {
                method: method.to_string(),
                path: path.to_string(),
                reason: format!("unsupported method '{method}'"),
            })?;

        let mut builder = self.client.request(http_method, self.url_for(path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = payload {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| ApiError::RequestFailed {
            method: method.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}
