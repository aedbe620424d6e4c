use crate::error::TransportError;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// A single outbound HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// What came back over the wire, before classification.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The wire. Implementations must not retry or interpret statuses.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a HttpRequest)
        -> BoxFuture<'a, Result<ApiResponse, TransportError>>;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut default_headers = HeaderMap::new();
        let ua = HeaderValue::from_str(user_agent)
            .map_err(|e| TransportError::new(format!("invalid user agent: {}", e)))?;
        default_headers.insert(USER_AGENT, ua);
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
            let res = builder.send().await?;
            let status = res.status();
            let headers = res.headers().clone();
            let body = res.text().await?;
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
