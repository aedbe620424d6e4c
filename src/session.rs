//! Authenticated requests with a rotating session token.
//!
//! The API trades a long-lived credential (a password, or an autologin token
//! derived from it) for a short-lived PIN returned in `X-Pin`. Once a PIN is
//! cached it is the only credential sent. A rejected PIN is dropped and the
//! request is retried exactly once with the long-lived credential.

use crate::error::ApiError;
use crate::pipeline::RequestPipeline;
use crate::transport::{ApiResponse, HttpRequest};
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const PIN_HEADER: &str = "pin";
pub const AUTOLOGIN_HEADER: &str = "autologin";
pub const PASSWORD_HEADER: &str = "password";
pub const RESPONSE_PIN_HEADER: &str = "x-pin";
pub const RESPONSE_AUTOLOGIN_HEADER: &str = "x-autologin";

/// Long-lived credential supplied by the caller.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    Password(String),
    Autologin(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::Autologin(_) => f.write_str("Autologin(***)"),
        }
    }
}

/// Which credential the next request will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    NoAuth,
    PrimaryAuth,
    SecondaryAuth,
    SessionAuth,
}

#[derive(Debug)]
struct Credentials {
    long_lived: Credential,
    pin: Option<String>,
}

impl Credentials {
    fn state(&self) -> AuthState {
        match (&self.pin, &self.long_lived) {
            (Some(_), _) => AuthState::SessionAuth,
            (None, Credential::Password(_)) => AuthState::PrimaryAuth,
            (None, Credential::Autologin(_)) => AuthState::SecondaryAuth,
            (None, Credential::None) => AuthState::NoAuth,
        }
    }

    // Headers for the next request, plus the PIN they carry if any.
    fn headers(&self, use_pin: bool) -> Result<(HeaderMap, Option<String>), ApiError> {
        let mut headers = HeaderMap::new();
        if use_pin {
            if let Some(pin) = &self.pin {
                insert(&mut headers, PIN_HEADER, pin)?;
                return Ok((headers, Some(pin.clone())));
            }
        }
        match &self.long_lived {
            Credential::Password(p) => insert(&mut headers, PASSWORD_HEADER, p)?,
            Credential::Autologin(a) => insert(&mut headers, AUTOLOGIN_HEADER, a)?,
            Credential::None => {}
        }
        Ok((headers, None))
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(value).map_err(|_| ApiError::BadRequest {
        message: format!("credential for {} header is not a valid header value", name),
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// One authenticated identity on top of a shared [`RequestPipeline`].
pub struct CredentialSession {
    pipeline: Arc<RequestPipeline>,
    credentials: Mutex<Credentials>,
}

impl CredentialSession {
    pub fn new(pipeline: Arc<RequestPipeline>, credential: Credential) -> Self {
        Self {
            pipeline,
            credentials: Mutex::new(Credentials {
                long_lived: credential,
                pin: None,
            }),
        }
    }

    pub async fn state(&self) -> AuthState {
        self.credentials.lock().await.state()
    }

    /// Execute `request` with this identity's credentials attached.
    pub async fn execute_authenticated(
        &self,
        request: HttpRequest,
    ) -> Result<ApiResponse, ApiError> {
        let (headers, pin) = self.credentials.lock().await.headers(true)?;
        let first = self.pipeline.execute(with_headers(&request, headers)).await;
        match first {
            Err(err) if err.is_authorization_rejected() && pin.is_some() => {
                info!("session token rejected; retrying with long-lived credential");
                let headers = {
                    let mut creds = self.credentials.lock().await;
                    // another request may already have rotated it
                    if creds.pin == pin {
                        creds.pin = None;
                    }
                    creds.headers(false)?.0
                };
                let retry = self.pipeline.execute(with_headers(&request, headers)).await?;
                self.absorb(&retry).await;
                Ok(retry)
            }
            Ok(response) => {
                self.absorb(&response).await;
                Ok(response)
            }
            Err(err) => Err(err),
        }
    }

    async fn absorb(&self, response: &ApiResponse) {
        let Some(pin) = response.header(RESPONSE_PIN_HEADER) else {
            return;
        };
        let mut creds = self.credentials.lock().await;
        if creds.long_lived == Credential::None && creds.pin.is_none() {
            // an unauthenticated request has no session to keep
            return;
        }
        if let Some(autologin) = response.header(RESPONSE_AUTOLOGIN_HEADER) {
            creds.long_lived = Credential::Autologin(autologin.to_string());
        }
        if creds.pin.as_deref() != Some(pin) {
            debug!("caching new session token");
            creds.pin = Some(pin.to_string());
        }
    }
}

fn with_headers(request: &HttpRequest, headers: HeaderMap) -> HttpRequest {
    let mut request = request.clone();
    request.headers.extend(headers);
    request
}
