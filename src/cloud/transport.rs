//! HTTP transport shared by the REST clients.
//!
//! All Google APIs used here are JSON over HTTPS. Requests go through a
//! [`RoundTripper`] so that the simulator can answer them in-process; the
//! live implementation wraps `reqwest`.

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{CloudError, Result};

/// Content type of every JSON request and response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A request handed to a [`RoundTripper`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Content type of the body.
    pub content_type: Option<String>,
}

/// A response returned by a [`RoundTripper`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Numeric HTTP status.
    pub status: u16,
    /// Content type.
    pub content_type: String,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Builds a JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        Ok(Self {
            status,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: serde_json::to_vec(value)?,
        })
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Executes one HTTP exchange.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Error envelope returned by Google APIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error.
    pub error: ErrorBody,
}

/// Body of an [`ErrorEnvelope`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    /// HTTP status code.
    pub code: u16,
    /// Human readable message.
    pub message: String,
    /// Symbolic status, e.g. `NOT_FOUND`.
    pub status: String,
}

impl ErrorEnvelope {
    /// Builds the wire form of a cloud error.
    #[must_use]
    pub fn from_error(error: &CloudError) -> Self {
        let (status, code) = error.wire_status();
        Self {
            error: ErrorBody {
                code,
                message: error.to_string(),
                status: status.to_string(),
            },
        }
    }
}

/// Live transport authenticating with an OAuth bearer token.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    /// HTTP client.
    client: Client,
    /// Access token.
    token: String,
}

impl ReqwestTransport {
    /// Creates a transport using `token` for every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CloudError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl RoundTripper for ReqwestTransport {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse> {
        trace!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&self.token);
        if let Some(body) = request.body {
            let content_type = request
                .content_type
                .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string());
            builder = builder.header(header::CONTENT_TYPE, content_type).body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CloudError::network(format!("{} {}: {e}", request.method, request.url)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| CloudError::network(format!("Failed to read response body: {e}")))?
            .to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Typed JSON client over a [`RoundTripper`].
#[derive(Clone)]
pub struct ApiClient {
    /// Underlying transport.
    transport: Arc<dyn RoundTripper>,
    /// Base URL every path is appended to, ending in `/`.
    base_url: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTripper>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends a request and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns a typed cloud error for non-2xx responses, or a decode error.
    pub async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_vec).transpose()?;
        self.call_raw(method, path, body, Some(JSON_CONTENT_TYPE)).await
    }

    /// Sends a request with an arbitrary body and decodes the JSON response.
    ///
    /// `path` may be absolute (starting with `https://`), in which case the base URL is ignored.
    ///
    /// # Errors
    ///
    /// Returns a typed cloud error for non-2xx responses, or a decode error.
    pub async fn call_raw<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        content_type: Option<&str>,
    ) -> Result<T> {
        let url = if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        };
        debug!("{method} {url}");

        let response = self
            .transport
            .round_trip(HttpRequest {
                method,
                url,
                content_type: body.as_ref().and(content_type.map(str::to_string)),
                body,
            })
            .await?;

        if !response.is_success() {
            return Err(decode_error(&response).into());
        }
        if response.body.is_empty() {
            return Ok(serde_json::from_slice(b"{}")?);
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// `GET` helper.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call::<(), T>(Method::GET, path, None).await
    }

    /// `POST` helper.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn post<B: Serialize + Sync + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.call(Method::POST, path, Some(body)).await
    }

    /// `DELETE` helper.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::call`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call::<(), T>(Method::DELETE, path, None).await
    }
}

/// Maps an error response to a typed error.
fn decode_error(response: &HttpResponse) -> CloudError {
    match serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        Ok(envelope) => {
            let code = if envelope.error.code == 0 {
                response.status
            } else {
                envelope.error.code
            };
            CloudError::from_api(code, &envelope.error.status, envelope.error.message)
        }
        Err(_) => CloudError::from_api(
            response.status,
            "",
            String::from_utf8_lossy(&response.body).into_owned(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraError;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    #[tokio::test]
    async fn test_reqwest_transport_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/p/global/networks/n"))
            .and(header_matcher("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "n"})))
            .mount(&server)
            .await;

        let transport = Arc::new(ReqwestTransport::new("t0ken").expect("client"));
        let api = ApiClient::new(transport, format!("{}/", server.uri()));
        let named: Named = api.get("projects/p/global/networks/n").await.expect("request succeeds");
        assert_eq!(named.name, "n");
    }

    #[tokio::test]
    async fn test_error_envelope_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"code": 404, "message": "network n not found", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        let transport = Arc::new(ReqwestTransport::new("t").expect("client"));
        let api = ApiClient::new(transport, format!("{}/", server.uri()));
        let err = api.get::<Named>("anything").await.expect_err("404 is an error");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let transport = Arc::new(ReqwestTransport::new("t").expect("client"));
        let api = ApiClient::new(transport, format!("{}/", server.uri()));
        let err = api
            .post::<_, Named>("x", &serde_json::json!({}))
            .await
            .expect_err("503 is an error");
        assert!(matches!(err, InfraError::Cloud(CloudError::Api { code: 503, .. })));
        assert!(err.is_retryable());
    }
}
