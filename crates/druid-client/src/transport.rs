//! HTTP transport with retry logic.
//!
//! The query and cluster layers never see `reqwest` directly: they talk to a
//! [`Transport`], which returns every HTTP response as-is. Deciding whether a
//! status code is a failure is the caller's job, so a 404 from a lookup and a
//! 500 from a SQL query can be reported differently.

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    policies::ExponentialBackoff, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: HashMap<String, String>,
    /// Raw response body
    pub body: String,
}

impl HttpResponse {
    /// Create a response from its parts. Header names are lower-cased.
    pub fn new(status: u16, headers: HashMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body: body.into(),
        }
    }

    /// True for 200 OK and 202 Accepted, the two codes Druid uses for success.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16() || self.status == StatusCode::ACCEPTED.as_u16()
    }

    /// Look up a response header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            ClientError::InvalidResponse(format!(
                "Failed to parse response: {} (body: {})",
                e, self.body
            ))
        })
    }

    /// Best-effort error message for a failed response: the JSON `error`
    /// field, else the raw body, else a synthesized status message.
    pub fn error_message(&self) -> String {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&self.body) {
            match obj.get("error") {
                Some(Value::String(msg)) if !msg.trim().is_empty() => return msg.clone(),
                Some(Value::Null) | None => {}
                Some(other) if !other.is_string() => return other.to_string(),
                _ => {}
            }
        }
        if !self.body.trim().is_empty() {
            return self.body.clone();
        }
        format!("Failed with HTTP status {}", self.status)
    }

    /// Convert a non-success response into an error.
    pub fn check(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ClientError::query(Some(self.status), self.error_message()))
        }
    }

    /// Require success, then parse the body as JSON.
    pub fn into_json(self) -> Result<Value> {
        self.check()?.json()
    }
}

/// The HTTP collaborator used by every other layer.
///
/// Non-2xx responses are returned as `Ok`; only failures to complete the
/// exchange (connect, timeout, TLS) are errors.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Base URL requests are resolved against.
    fn base_url(&self) -> &str;

    /// Issue a GET request.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<HttpResponse>;

    /// Issue a POST request with a JSON body and extra request headers.
    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse>;

    /// Issue a DELETE request.
    async fn delete(&self, path: &str) -> Result<HttpResponse>;
}

/// Builds transports for endpoints discovered at runtime.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    /// Create a transport for the given base URL.
    fn connect(&self, base_url: &str) -> Result<Arc<dyn Transport>>;
}

/// Fill `{}` placeholders in a request template with URL-encoded arguments.
///
/// ```
/// use druid_client::transport::build_path;
/// let path = build_path("/druid/v2/sql/async/{}/status", &["a b"]);
/// assert_eq!(path, "/druid/v2/sql/async/a%20b/status");
/// ```
pub fn build_path(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(&urlencoding::encode(arg)),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

/// `reqwest`-backed transport with automatic retries.
pub struct HttpTransport {
    http: ClientWithMiddleware,
    base_url: String,
    auth: Option<(String, Option<String>)>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport for `config.base_url`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("druid-client")),
        );

        let reqwest_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(config.retry_initial_delay, config.retry_max_delay)
            .build_with_max_retries(config.max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                DruidRetryStrategy,
            ))
            .build();

        Ok(Self {
            http: client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        extra_headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, path);
        let start = std::time::Instant::now();

        tracing::debug!(method = %method, path = %path, "Sending request");

        let mut request = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, password.as_ref());
        }
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::usage(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::usage(format!("Invalid header value: {e}")))?;
            request = request.header(name, value);
        }
        if let Some(b) = body {
            request = request.body(serde_json::to_vec(b)?);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(method = %method, path = %path, error = %e, "Request failed");
                return Err(e.into());
            }
        };
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect::<HashMap<_, _>>();
        let body = response.text().await?;

        tracing::debug!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "Received response"
        );

        Ok(HttpResponse::new(status.as_u16(), headers, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<HttpResponse> {
        self.request(Method::GET, path, query, None, &[]).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        self.request(Method::POST, path, &[], Some(body), headers)
            .await
    }

    async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.request(Method::DELETE, path, &[], None, &[]).await
    }
}

/// Creates an [`HttpTransport`] per endpoint, sharing one configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    config: ClientConfig,
}

impl HttpTransportFactory {
    /// Create a factory that copies `config` for each endpoint.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn Transport>> {
        let transport = HttpTransport::new(&self.config.for_endpoint(base_url))?;
        Ok(Arc::new(transport))
    }
}

/// Retry strategy for Druid.
///
/// Retries on:
/// - Connection failures (the request never reached the server)
/// - 503 service unavailable and 429 rate limiting
///
/// Does NOT retry timeouts or 5xx answers in general: a SQL POST that timed
/// out may still be running, and resubmitting it would run it twice.
struct DruidRetryStrategy;

impl RetryableStrategy for DruidRetryStrategy {
    fn handle(&self, res: &reqwest_middleware::Result<reqwest::Response>) -> Option<Retryable> {
        match res {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::SERVICE_UNAVAILABLE
                    || status == StatusCode::TOO_MANY_REQUESTS
                {
                    Some(Retryable::Transient)
                } else {
                    None
                }
            }
            Err(error) => {
                if error.is_connect() {
                    Some(Retryable::Transient)
                } else {
                    Some(Retryable::Fatal)
                }
            }
        }
    }
}
