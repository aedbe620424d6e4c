use crate::error::{map_status_to_error, ApiError};
use crate::gate::AdmissionGate;
use crate::rate::{IssueTicket, RateTracker, TrackerOptions};
use crate::transport::{ApiResponse, HttpRequest, Transport};
use log::{debug, warn};
use reqwest::header::{HeaderValue, InvalidHeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the server's count of requests seen in its window.
pub const REQUESTS_SEEN_HEADER: &str = "x-ratelimit-requests-seen";

/// Local throttling knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Refuse or delay requests the estimator judges unsafe.
    pub enforce: bool,
    /// Sleep and re-check instead of failing on the first refusal.
    pub sleep: bool,
    pub sleep_time: Duration,
    pub max_sleeps: u32,
    /// Requests allowed per window.
    pub max_allowed: u32,
    pub within: Duration,
    /// Safety ceiling; above `server_limit` it lets a request through once sleeps run out.
    pub max_safe_requests: u32,
    /// The limit the API publishes.
    pub server_limit: u32,
    pub report_skew: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enforce: true,
            sleep: false,
            sleep_time: Duration::from_secs(4),
            max_sleeps: 10,
            max_allowed: 48,
            within: Duration::from_secs(30),
            max_safe_requests: 48,
            server_limit: 50,
            report_skew: Duration::from_secs(2),
        }
    }
}

impl RateLimitPolicy {
    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            window: self.within,
            report_skew: self.report_skew,
        }
    }
}

/// Admission-controlled path from a request to a classified outcome.
///
/// One pipeline holds the client's whole rate budget: every request sent through
/// it shares the same tracker and the same in-flight gate.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    tracker: Arc<RateTracker>,
    gate: AdmissionGate,
    policy: RateLimitPolicy,
    user_agent: HeaderValue,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RateLimitPolicy,
        max_concurrent: usize,
        user_agent: &str,
    ) -> Result<Self, InvalidHeaderValue> {
        let user_agent = HeaderValue::from_str(user_agent)?;
        Ok(Self {
            transport,
            tracker: Arc::new(RateTracker::new(policy.tracker_options())),
            gate: AdmissionGate::new(max_concurrent),
            policy,
            user_agent,
        })
    }

    pub fn tracker(&self) -> &Arc<RateTracker> {
        &self.tracker
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Send `request` if the rate budget allows it and classify the response.
    pub async fn execute(&self, request: HttpRequest) -> Result<ApiResponse, ApiError> {
        let _slot = self.gate.acquire().await;
        let mut ticket = self.tracker.issue();
        self.check_ratelimit(&mut ticket).await?;
        ticket.mark_sent();

        let mut request = request;
        request.headers.insert(USER_AGENT, self.user_agent.clone());
        debug!("{} {}", request.method, request.url);
        let response = self.transport.send(&request).await?;

        if let Some(seen) = parse_requests_seen(&response) {
            debug!("server reports {} requests seen", seen);
            self.tracker.record_server_report(seen);
        }
        classify(response)
    }

    // A sleeping request is not on the wire, so it must not hold budget that
    // others could use. It counts again, stamped at wake-up, before each re-check.
    async fn check_ratelimit(&self, ticket: &mut IssueTicket<'_>) -> Result<(), ApiError> {
        let p = &self.policy;
        if !p.enforce || self.tracker.admit(p.max_allowed, p.within) {
            return Ok(());
        }
        if p.sleep {
            for n in 1..=p.max_sleeps {
                ticket.withdraw();
                warn!(
                    "rate limit near ({} of {}), sleeping {:?} ({}/{})",
                    self.tracker.estimate_usage(),
                    p.max_allowed,
                    p.sleep_time,
                    n,
                    p.max_sleeps
                );
                tokio::time::sleep(p.sleep_time).await;
                ticket.restamp();
                if self.tracker.admit(p.max_allowed, p.within) {
                    return Ok(());
                }
            }
            if p.max_safe_requests > p.server_limit {
                warn!(
                    "still over the local limit after {} sleeps; sending anyway (ceiling {} > server limit {})",
                    p.max_sleeps, p.max_safe_requests, p.server_limit
                );
                return Ok(());
            }
        }
        Err(ApiError::RateLimitExceeded {
            used: self.tracker.estimate_usage(),
            allowed: p.max_allowed,
        })
    }
}

fn parse_requests_seen(response: &ApiResponse) -> Option<u32> {
    response
        .header(REQUESTS_SEEN_HEADER)
        .and_then(|s| s.trim().parse::<u32>().ok())
}

/// Turn a raw response into an outcome.
pub fn classify(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.status.is_success() {
        return Ok(response);
    }
    let err = map_status_to_error(response.status, &response.headers, &response.body);
    debug!("status {} classified as {}", response.status, err.code());
    Err(err)
}
