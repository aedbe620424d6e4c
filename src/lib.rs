//! Rate-limit aware client for the NationStates API.
//!
//! The API bans an IP for a while once it exceeds its request budget, so every
//! request goes through one [`RequestPipeline`] per client: an
//! [`AdmissionGate`] bounds concurrency, a [`RateTracker`] estimates usage from
//! local issue times reconciled with the server's own count, and a
//! [`CredentialSession`] handles rotating session tokens for private shards.

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod rate;
pub mod resource;
pub mod session;
pub mod transport;

pub use client::{ClientError, NsClient, PrivateNation};
pub use config::Config;
pub use error::{ApiError, TransportError};
pub use gate::{AdmissionGate, GatePermit};
pub use pipeline::{RateLimitPolicy, RequestPipeline};
pub use rate::{RateTracker, TrackerOptions};
pub use resource::{build_url, Resource, Shard};
pub use session::{AuthState, Credential, CredentialSession};
pub use transport::{ApiResponse, HttpRequest, ReqwestTransport, Transport};
