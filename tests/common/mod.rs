#![allow(dead_code)]

use futures::future::BoxFuture;
use nsapi_client::{ApiResponse, HttpRequest, Transport, TransportError};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One canned reply.
#[derive(Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: "<NATION id=\"testlandia\"></NATION>".into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: format!("<html><h1>status {}</h1></html>", status),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Transport that replays a script and records what it was asked to send.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Duration,
    pub sent: Mutex<Vec<HttpRequest>>,
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(script.into()),
            fallback: Reply::ok(),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_header(&self, index: usize, name: &str) -> Option<String> {
        self.sent.lock().unwrap()[index]
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        request: &'a HttpRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.sent.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            self.current.fetch_sub(1, Ordering::SeqCst);
            let mut headers = HeaderMap::new();
            for (k, v) in reply.headers {
                headers.insert(k, v.parse().unwrap());
            }
            Ok(ApiResponse {
                status: StatusCode::from_u16(reply.status).unwrap(),
                headers,
                body: reply.body,
            })
        })
    }
}

/// Transport whose every send fails before a status is obtained.
pub struct DownTransport;

impl Transport for DownTransport {
    fn send<'a>(
        &'a self,
        _request: &'a HttpRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async { Err(TransportError::new("connection refused")) })
    }
}
