//! Authenticated JSON-over-HTTP client for the cloud API
//!
//! Every remote call made by a resource lifecycle goes through
//! [`GatewayClient::do_request`], which attaches the invocation's bearer
//! token and turns the HTTP status into either a body or an [`Error`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::error::ApiError;
use crate::Error;

/// Default timeout applied by [`ReqwestTransport`]
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully-built HTTP request handed to the transport
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body
    pub body: Option<Vec<u8>>,
}

impl GatewayRequest {
    /// Look up a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw HTTP response returned by the transport
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// Response with a status and JSON body
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    /// Response with a status and no body
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Executes HTTP requests
///
/// Substitutable so the classification logic can be tested without a server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and return status and body
    ///
    /// Only connection-level failures are errors; every HTTP status is a response.
    async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, Error>;
}

/// Production transport backed by reqwest
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the default request timeout
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, Error> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(format!("failed to execute request: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("failed to read response body: {e}")))?;

        Ok(GatewayResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Client for the cloud API gateway
///
/// Cloning is cheap. A per-invocation copy carrying the bearer token and the
/// invocation's cancellation token is produced with [`GatewayClient::authorized`].
#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    token: Option<String>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base_url", &self.base_url)
            .field("authorized", &self.token.is_some())
            .finish()
    }
}

impl GatewayClient {
    /// Create an unauthenticated client for the given gateway base URL
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            token: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Copy of this client that sends `token` and aborts when `cancel` fires
    pub fn authorized(&self, token: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            base_url: self.base_url.clone(),
            transport: self.transport.clone(),
            token: Some(token.into()),
            cancel,
        }
    }

    /// Gateway base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one request and classify the response
    ///
    /// Returns the response body for success statuses.
    pub async fn do_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>, Error> {
        if self.base_url.is_empty() {
            return Err(Error::config("api gateway url not loaded"));
        }

        let url = format!("{}{}", self.base_url, endpoint);
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        if let Some(token) = &self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        let body = body.map(|b| serde_json::to_vec(&b)).transpose()?;

        debug!(method = %method, url = %url, "API request");
        let request = GatewayRequest {
            method: method.clone(),
            url,
            headers,
            body,
        };

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.transport.execute(request) => response?,
        };
        debug!(method = %method, status = response.status, "API response");

        classify_response(&method, response)
    }

    /// GET and decode a JSON body
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, Error> {
        let body = self.do_request(Method::GET, endpoint, None).await?;
        decode(&body)
    }

    /// POST a JSON body and decode the response
    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self
            .do_request(Method::POST, endpoint, Some(serde_json::to_value(body)?))
            .await?;
        decode(&body)
    }

    /// PUT a JSON body and decode the response, if the API sent one
    pub async fn put<B, T>(&self, endpoint: &str, body: &B) -> Result<Option<T>, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self
            .do_request(Method::PUT, endpoint, Some(serde_json::to_value(body)?))
            .await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        decode(&body).map(Some)
    }

    /// DELETE; the response body is ignored
    pub async fn delete(&self, endpoint: &str) -> Result<(), Error> {
        self.do_request(Method::DELETE, endpoint, None).await?;
        Ok(())
    }
}

/// Map a response status to a result
///
/// DELETE additionally accepts 404 and 405: the API answers those for
/// resources that are already gone.
pub fn classify_response(method: &Method, response: GatewayResponse) -> Result<Vec<u8>, Error> {
    let status = response.status;
    let deleted_already = *method == Method::DELETE && matches!(status, 404 | 405);

    if matches!(status, 200 | 201 | 202 | 204) || deleted_already {
        return Ok(response.body);
    }

    if (400..600).contains(&status) {
        let err = ApiError::from_body(status, &response.body);
        warn!(status, error = %err, "API error response");
        return Err(Error::Api(err));
    }

    Err(Error::transport(format!(
        "request failed with status: {status}"
    )))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body)
        .map_err(|e| Error::serialization(format!("failed to decode response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    fn client_with(transport: MockHttpTransport) -> GatewayClient {
        GatewayClient::new("https://api.example.test", Arc::new(transport))
            .authorized("tok-123", CancellationToken::new())
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Created {
        id: String,
    }

    #[rstest]
    #[case::ok(Method::GET, 200)]
    #[case::created(Method::POST, 201)]
    #[case::accepted(Method::PUT, 202)]
    #[case::no_content(Method::DELETE, 204)]
    #[case::delete_not_found(Method::DELETE, 404)]
    #[case::delete_not_allowed(Method::DELETE, 405)]
    fn test_success_statuses(#[case] method: Method, #[case] status: u16) {
        assert!(classify_response(&method, GatewayResponse::empty(status)).is_ok());
    }

    #[rstest]
    #[case::get_not_found(Method::GET, 404)]
    #[case::put_not_allowed(Method::PUT, 405)]
    #[case::bad_request(Method::POST, 400)]
    #[case::unprocessable(Method::POST, 422)]
    #[case::server_error(Method::DELETE, 500)]
    #[case::unavailable(Method::GET, 503)]
    fn test_error_statuses_are_structured(#[case] method: Method, #[case] status: u16) {
        let err = classify_response(&method, GatewayResponse::empty(status)).unwrap_err();
        assert_eq!(err.api_error().map(|e| e.status), Some(status));
    }

    #[rstest]
    #[case::redirect(302)]
    #[case::info(101)]
    #[case::partial(206)]
    fn test_unexpected_statuses_are_transport_errors(#[case] status: u16) {
        let err = classify_response(&Method::GET, GatewayResponse::empty(status)).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains(&status.to_string()));
    }

    /// Story: Deleting something the API already forgot is the same as deleting it
    #[tokio::test]
    async fn story_delete_is_idempotent() {
        for status in [204u16, 404, 405] {
            let mut transport = MockHttpTransport::new();
            transport
                .expect_execute()
                .returning(move |_| Ok(GatewayResponse::json(status, &json!({"title": "gone"}))));

            let client = client_with(transport);
            assert!(
                client.delete("/projects/p-1").await.is_ok(),
                "DELETE answered with {status} should succeed"
            );
        }
    }

    #[tokio::test]
    async fn test_request_carries_auth_and_json_headers() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .withf(|req| {
                req.method == Method::POST
                    && req.url == "https://api.example.test/projects"
                    && req.header("authorization") == Some("Bearer tok-123")
                    && req.header("content-type") == Some("application/json")
                    && req.header("accept") == Some("*/*")
                    && req.body.as_deref() == Some(br#"{"name":"billing"}"#.as_slice())
            })
            .times(1)
            .returning(|_| Ok(GatewayResponse::json(201, &json!({"id": "p-1"}))));

        let client = client_with(transport);
        let created: Created = client
            .post("/projects", &json!({"name": "billing"}))
            .await
            .expect("post should succeed");
        assert_eq!(created.id, "p-1");
    }

    #[tokio::test]
    async fn test_structured_error_is_returned() {
        let mut transport = MockHttpTransport::new();
        transport.expect_execute().returning(|_| {
            Ok(GatewayResponse::json(
                422,
                &json!({"title": "Validation failed", "status": 400, "traceId": "t-9"}),
            ))
        });

        let client = client_with(transport);
        let err = client.get::<Created>("/projects/p-1").await.unwrap_err();
        let api = err.api_error().expect("structured error");
        assert_eq!(api.status, 422);
        assert_eq!(api.title, "Validation failed");
        assert_eq!(api.trace_id, "t-9");
    }

    #[tokio::test]
    async fn test_missing_base_url_is_a_config_error() {
        let transport = MockHttpTransport::new();
        let client = GatewayClient::new("", Arc::new(transport));
        let err = client.delete("/projects/p-1").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    /// Story: Shutdown in the middle of a call is retried, never treated as a 4xx
    #[tokio::test]
    async fn story_cancellation_surfaces_as_retriable_error() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .times(0..=1)
            .returning(|_| Ok(GatewayResponse::empty(404)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = GatewayClient::new("https://api.example.test", Arc::new(transport))
            .authorized("tok", cancel);

        let err = client
            .do_request(Method::GET, "/projects", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(err.api_error().is_none());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Err(Error::transport("connection refused")));

        let client = client_with(transport);
        let err = client.get::<Created>("/projects").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_undecodable_success_body() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(GatewayResponse::empty(200)));

        let client = client_with(transport);
        let err = client.get::<Created>("/projects/p-1").await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[rstest]
    #[case::no_content(204)]
    #[case::accepted(202)]
    #[case::ok(200)]
    #[tokio::test]
    async fn test_put_without_body_succeeds(#[case] status: u16) {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .withf(|req| req.method == Method::PUT)
            .times(1)
            .returning(move |_| Ok(GatewayResponse::empty(status)));

        let client = client_with(transport);
        let updated: Option<Created> = client
            .put("/projects/p-1", &json!({"name": "billing"}))
            .await
            .expect("empty success body is accepted");
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_put_decodes_returned_body() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_execute()
            .returning(|_| Ok(GatewayResponse::json(200, &json!({"id": "p-1"}))));

        let client = client_with(transport);
        let updated: Option<Created> = client
            .put("/projects/p-1", &json!({"name": "billing"}))
            .await
            .unwrap();
        assert_eq!(updated.unwrap().id, "p-1");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = GatewayClient::new(
            "https://api.example.test/",
            Arc::new(MockHttpTransport::new()),
        );
        assert_eq!(client.base_url(), "https://api.example.test");
    }
}
