//! Sliding-window estimate of how much of the shared rate budget is in use.
//!
//! Two series are kept, both newest-first: timestamps of requests this client
//! put on the wire, and the usage counts the server echoed back on responses.
//! The server is authoritative for bans but its count lags by a round trip, so
//! the estimate takes the freshest trustworthy server snapshot and adds the
//! local issues sent after it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Reconciliation tuning for a [`RateTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Width of the sliding window.
    pub window: Duration,
    /// Reports observed this close to the newest one compete on count.
    pub report_skew: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            report_skew: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ServerReport {
    observed_at: Instant,
    count: u32,
}

#[derive(Debug, Default)]
struct Series {
    local: VecDeque<Instant>,
    reports: VecDeque<ServerReport>,
}

impl Series {
    // Entries are newest-first, so expired ones sit at the back.
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&t) = self.local.back() {
            if expired(t, window, now) {
                self.local.pop_back();
            } else {
                break;
            }
        }
        while let Some(r) = self.reports.back() {
            if expired(r.observed_at, window, now) {
                self.reports.pop_back();
            } else {
                break;
            }
        }
    }

    fn live_reports(&self, window: Duration, now: Instant) -> impl Iterator<Item = &ServerReport> {
        self.reports
            .iter()
            .take_while(move |r| !expired(r.observed_at, window, now))
    }

    fn most_relevant_report(
        &self,
        window: Duration,
        skew: Duration,
        now: Instant,
    ) -> Option<ServerReport> {
        let mut live = self.live_reports(window, now);
        let newest = *live.next()?;
        let mut best = newest;
        for r in live {
            if newest.observed_at.saturating_duration_since(r.observed_at) > skew {
                break;
            }
            // strict comparison keeps the more recent report on ties
            if r.count > best.count {
                best = *r;
            }
        }
        Some(best)
    }

    // Reads through the window without dropping anything, so a narrow
    // `window` never discards history a wider one still counts.
    fn estimate(&self, window: Duration, skew: Duration, now: Instant) -> u32 {
        let live = self
            .local
            .iter()
            .take_while(|&&t| !expired(t, window, now))
            .count();
        let local_count = live as u32;
        let Some(report) = self.most_relevant_report(window, skew, now) else {
            return local_count;
        };
        match live.checked_sub(1).and_then(|i| self.local.get(i)) {
            Some(&oldest) if report.observed_at >= oldest => {
                let after = self
                    .local
                    .iter()
                    .take_while(|&&t| t > report.observed_at)
                    .count() as u32;
                report.count.saturating_add(after).min(local_count)
            }
            _ => local_count,
        }
    }
}

fn expired(t: Instant, window: Duration, now: Instant) -> bool {
    now.saturating_duration_since(t) >= window
}

// Keeps newest-first even if a caller's clock reading raced another's.
fn insert_newest_first(local: &mut VecDeque<Instant>, at: Instant) {
    let pos = local.iter().position(|&t| t <= at).unwrap_or(local.len());
    local.insert(pos, at);
}

fn retract(series: &mut Series, at: Instant) {
    if let Some(pos) = series.local.iter().position(|&t| t == at) {
        series.local.remove(pos);
    }
}

/// Per-client rate budget tracker. Share it behind an `Arc`.
#[derive(Debug)]
pub struct RateTracker {
    options: TrackerOptions,
    series: Mutex<Series>,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(TrackerOptions::default())
    }
}

impl RateTracker {
    pub fn new(options: TrackerOptions) -> Self {
        Self {
            options,
            series: Mutex::new(Series::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Series> {
        // The series stay structurally valid even if a holder panicked.
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a request put on the wire.
    pub fn record_local_issue(&self) {
        self.record_local_issue_at(Instant::now());
    }

    /// Record a request that is about to be sent.
    ///
    /// The issue counts towards the estimate immediately. Dropping the ticket
    /// without calling [`IssueTicket::mark_sent`] retracts it again, so a
    /// request refused or abandoned before the wire leaves no trace.
    pub fn issue(&self) -> IssueTicket<'_> {
        let at = Instant::now();
        self.record_local_issue_at(at);
        IssueTicket {
            tracker: self,
            at: Some(at),
            sent: false,
        }
    }

    pub(crate) fn record_local_issue_at(&self, at: Instant) {
        insert_newest_first(&mut self.lock().local, at);
    }

    /// Remove a local issue that was recorded but never sent.
    pub(crate) fn retract_local_issue(&self, at: Instant) {
        retract(&mut self.lock(), at);
    }

    fn restamp_local_issue(&self, from: Option<Instant>, to: Instant) {
        let mut series = self.lock();
        if let Some(at) = from {
            retract(&mut series, at);
        }
        insert_newest_first(&mut series.local, to);
    }

    /// Record the usage count the server reported on a response.
    pub fn record_server_report(&self, count: u32) {
        self.record_server_report_at(count, Instant::now());
    }

    pub(crate) fn record_server_report_at(&self, count: u32, at: Instant) {
        let mut series = self.lock();
        let report = ServerReport {
            observed_at: at,
            count,
        };
        let pos = series
            .reports
            .iter()
            .position(|r| r.observed_at <= at)
            .unwrap_or(series.reports.len());
        series.reports.insert(pos, report);
    }

    /// Current usage estimate over the configured window.
    pub fn estimate_usage(&self) -> u32 {
        let now = Instant::now();
        let mut series = self.lock();
        series.prune(self.options.window, now);
        series.estimate(self.options.window, self.options.report_skew, now)
    }

    pub(crate) fn estimate_usage_at(&self, within: Duration, now: Instant) -> u32 {
        self.lock().estimate(within, self.options.report_skew, now)
    }

    /// True when another request fits under `amount_allowed` within `within`.
    ///
    /// Entries older than the tracker's own window are dropped only when the
    /// answer is yes. `within` bounds the count, never what is kept.
    pub fn admit(&self, amount_allowed: u32, within: Duration) -> bool {
        self.admit_at(amount_allowed, within, Instant::now())
    }

    pub(crate) fn admit_at(&self, amount_allowed: u32, within: Duration, now: Instant) -> bool {
        let mut series = self.lock();
        let admitted = series.estimate(within, self.options.report_skew, now) < amount_allowed;
        if admitted {
            series.prune(self.options.window, now);
        }
        admitted
    }

    /// Newest count the server reported inside the window, if any.
    pub fn latest_server_report(&self) -> Option<u32> {
        let mut series = self.lock();
        series.prune(self.options.window, Instant::now());
        series.reports.front().map(|r| r.count)
    }

    /// Local issues still inside the window.
    pub fn local_issue_count(&self) -> usize {
        let mut series = self.lock();
        series.prune(self.options.window, Instant::now());
        series.local.len()
    }
}

/// Pending local issue; see [`RateTracker::issue`].
#[must_use = "dropping the ticket retracts the local issue"]
pub struct IssueTicket<'a> {
    tracker: &'a RateTracker,
    at: Option<Instant>,
    sent: bool,
}

impl IssueTicket<'_> {
    /// Stop counting the issue while the request waits off the wire.
    pub fn withdraw(&mut self) {
        if let Some(at) = self.at.take() {
            self.tracker.retract_local_issue(at);
        }
    }

    /// Count the issue again, stamped now.
    pub fn restamp(&mut self) {
        let now = Instant::now();
        self.tracker.restamp_local_issue(self.at.take(), now);
        self.at = Some(now);
    }

    /// Keep the issue: the request is going out.
    pub fn mark_sent(mut self) {
        if self.at.is_none() {
            self.restamp();
        }
        self.sent = true;
    }
}

impl Drop for IssueTicket<'_> {
    fn drop(&mut self) {
        if !self.sent {
            self.withdraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn empty_tracker_estimates_zero() {
        let rt = RateTracker::default();
        assert_eq!(rt.estimate_usage(), 0);
        assert!(rt.admit(1, WINDOW));
    }

    #[test]
    fn forty_ninth_request_is_refused() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..48 {
            rt.record_local_issue_at(t0 + ms(i * 20));
        }
        let now = t0 + ms(1000);
        assert_eq!(rt.estimate_usage_at(WINDOW, now), 48);
        assert!(!rt.admit_at(48, WINDOW, now));
        assert!(rt.admit_at(49, WINDOW, now));
    }

    #[test]
    fn server_report_plus_later_local_issue() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..48 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        let t = t0 + ms(500);
        rt.record_server_report_at(48, t);
        rt.record_local_issue_at(t + ms(10));
        assert_eq!(rt.estimate_usage_at(WINDOW, t + ms(20)), 49);
    }

    #[test]
    fn server_report_corrects_local_overcount() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..10 {
            rt.record_local_issue_at(t0 + ms(i * 100));
        }
        // server had only seen 3 when the 6th local issue was already out
        rt.record_server_report_at(3, t0 + ms(550));
        // 4 local issues after the report: 600..900
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(1000)), 7);
    }

    #[test]
    fn highest_report_within_skew_wins() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..20 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        // responses delivered out of order: the newer header carries the stale count
        rt.record_server_report_at(15, t0 + ms(100));
        rt.record_server_report_at(12, t0 + ms(150));
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(200)), 15);
    }

    #[test]
    fn reports_outside_skew_are_ignored() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..20 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        rt.record_server_report_at(18, t0 + ms(100));
        rt.record_server_report_at(5, t0 + ms(2200));
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(2300)), 5);
    }

    #[test]
    fn report_older_than_local_history_falls_back_to_local() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_server_report_at(40, t0);
        rt.record_local_issue_at(t0 + ms(10));
        rt.record_local_issue_at(t0 + ms(20));
        // the report predates both locals, so it cannot explain them
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(30)), 2);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_local_issue_at(t0);
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + WINDOW - ms(1)), 1);
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + WINDOW), 0);
    }

    #[test]
    fn stale_reports_are_pruned() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_local_issue_at(t0);
        rt.record_server_report_at(1, t0 + ms(5));
        let later = t0 + WINDOW + ms(5);
        rt.record_local_issue_at(later);
        assert_eq!(rt.estimate_usage_at(WINDOW, later + ms(1)), 1);
    }

    #[test]
    fn estimate_is_idempotent() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..5 {
            rt.record_local_issue_at(t0 + ms(i * 10_000));
        }
        rt.record_server_report_at(2, t0 + ms(35_000));
        let now = t0 + ms(45_000);
        let first = rt.estimate_usage_at(WINDOW, now);
        assert_eq!(first, rt.estimate_usage_at(WINDOW, now));
    }

    #[test]
    fn estimate_never_exceeds_local_issues() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_local_issue_at(t0);
        rt.record_server_report_at(45, t0 + ms(5));
        rt.record_local_issue_at(t0 + ms(10));
        let est = rt.estimate_usage_at(WINDOW, t0 + ms(20));
        assert!(est <= 2, "estimate {} exceeds local issues", est);
    }

    #[test]
    fn admission_is_monotone_in_allowance() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..10 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        let now = t0 + ms(50);
        assert!(!rt.admit_at(10, WINDOW, now));
        for n in 0..10 {
            assert!(!rt.admit_at(n, WINDOW, now));
        }
    }

    #[test]
    fn unsent_ticket_is_retracted() {
        let rt = RateTracker::default();
        rt.issue().mark_sent();
        {
            let _pending = rt.issue();
            assert_eq!(rt.local_issue_count(), 2);
        }
        assert_eq!(rt.local_issue_count(), 1);
    }

    #[test]
    fn retracted_issue_no_longer_counts() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_local_issue_at(t0);
        rt.record_local_issue_at(t0 + ms(1));
        rt.retract_local_issue(t0 + ms(1));
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(2)), 1);
    }

    #[test]
    fn equal_reports_within_skew_prefer_the_newer() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..10 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        rt.record_server_report_at(5, t0 + ms(100));
        rt.record_local_issue_at(t0 + ms(120));
        rt.record_server_report_at(5, t0 + ms(150));
        // the older report would add the issue at 120ms on top
        assert_eq!(rt.estimate_usage_at(WINDOW, t0 + ms(200)), 5);
    }

    #[test]
    fn narrow_admission_window_keeps_history() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        for i in 0..5 {
            rt.record_local_issue_at(t0 + ms(i));
        }
        let now = t0 + ms(60);
        assert!(rt.admit_at(48, ms(50), now));
        assert_eq!(rt.estimate_usage_at(WINDOW, now), 5);
        assert_eq!(rt.lock().local.len(), 5);
    }

    #[test]
    fn refusal_leaves_series_untouched() {
        let rt = RateTracker::default();
        let t0 = Instant::now();
        rt.record_local_issue_at(t0);
        rt.record_local_issue_at(t0 + WINDOW);
        let now = t0 + WINDOW + ms(1);
        assert!(!rt.admit_at(1, WINDOW, now));
        assert_eq!(rt.lock().local.len(), 2);
        assert!(rt.admit_at(2, WINDOW, now));
        assert_eq!(rt.lock().local.len(), 1);
    }

    #[test]
    fn withdrawn_ticket_counts_again_once_restamped() {
        let rt = RateTracker::default();
        let mut ticket = rt.issue();
        ticket.withdraw();
        assert_eq!(rt.local_issue_count(), 0);
        ticket.restamp();
        assert_eq!(rt.local_issue_count(), 1);
        ticket.mark_sent();
        assert_eq!(rt.local_issue_count(), 1);
    }

    #[test]
    fn withdrawn_ticket_is_recounted_when_sent() {
        let rt = RateTracker::default();
        let mut ticket = rt.issue();
        ticket.withdraw();
        ticket.mark_sent();
        assert_eq!(rt.local_issue_count(), 1);
    }
}
