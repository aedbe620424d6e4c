use crate::config::Config;
use crate::error::{ApiError, TransportError};
use crate::pipeline::RequestPipeline;
use crate::rate::RateTracker;
use crate::resource::{build_url, Resource, Shard};
use crate::session::{AuthState, Credential, CredentialSession};
use crate::transport::{ApiResponse, HttpRequest, ReqwestTransport, Transport};
use std::sync::Arc;
use url::Url;

/// Client-level construction failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid user agent: {0}")]
    UserAgent(#[from] reqwest::header::InvalidHeaderValue),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Entry point: one shared rate budget and in-flight gate for every resource.
#[derive(Clone)]
pub struct NsClient {
    pipeline: Arc<RequestPipeline>,
    base_url: Url,
    version: String,
}

impl NsClient {
    pub fn from_config(cfg: &Config) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&cfg.user_agent, cfg.timeout())?;
        Self::with_transport(cfg, Arc::new(transport))
    }

    pub fn with_transport(cfg: &Config, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        let pipeline = RequestPipeline::new(
            transport,
            cfg.policy.clone(),
            cfg.max_concurrent,
            &cfg.user_agent,
        )?;
        Ok(Self {
            pipeline: Arc::new(pipeline),
            base_url: cfg.api_url.clone(),
            version: cfg.api_version.clone(),
        })
    }

    pub fn tracker(&self) -> &Arc<RateTracker> {
        self.pipeline.tracker()
    }

    /// Latest usage count the server reported inside the window.
    pub fn server_usage(&self) -> Option<u32> {
        self.tracker().latest_server_report()
    }

    pub fn url(&self, resource: &Resource, shards: &[Shard]) -> Url {
        build_url(&self.base_url, resource, shards, &self.version)
    }

    /// Unauthenticated GET of `shards` on `resource`.
    pub async fn request(
        &self,
        resource: &Resource,
        shards: &[Shard],
    ) -> Result<ApiResponse, ApiError> {
        self.pipeline
            .execute(HttpRequest::get(self.url(resource, shards)))
            .await
    }

    pub fn private_nation(&self, name: impl Into<String>, credential: Credential) -> PrivateNation {
        PrivateNation {
            client: self.clone(),
            resource: Resource::Nation(name.into()),
            session: Arc::new(CredentialSession::new(self.pipeline.clone(), credential)),
        }
    }
}

/// A nation whose private shards need its credentials.
#[derive(Clone)]
pub struct PrivateNation {
    client: NsClient,
    resource: Resource,
    session: Arc<CredentialSession>,
}

impl PrivateNation {
    pub async fn request(&self, shards: &[Shard]) -> Result<ApiResponse, ApiError> {
        let url = self.client.url(&self.resource, shards);
        self.session.execute_authenticated(HttpRequest::get(url)).await
    }

    pub async fn auth_state(&self) -> AuthState {
        self.session.state().await
    }
}
