//! Per-IP limiter for failed password challenges
//!
//! Each client IP accumulates failures inside a fixed window that opens at
//! its first failure. Once `max_attempts` failures are on record the IP is
//! limited until the window closes, a successful challenge clears it, or the
//! periodic cleanup task resets the whole table.
//!
//! A password check reserves its slot with [`RateLimiter::try_acquire`]
//! before verifying. Reservations in flight count against the limit, so
//! concurrent submissions from one IP cannot verify more than
//! `max_attempts` guesses per window.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Outcome of [`RateLimiter::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStatus {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitStatus {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitStatus::Limited { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    opened_at: Instant,
    failures: u32,
    in_flight: u32,
}

impl FailureWindow {
    fn new(now: Instant) -> Self {
        Self {
            opened_at: now,
            failures: 0,
            in_flight: 0,
        }
    }

    fn used(&self) -> u32 {
        self.failures.saturating_add(self.in_flight)
    }

    fn is_idle(&self) -> bool {
        self.failures == 0 && self.in_flight == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Succeeded,
    Failed,
    Abandoned,
}

/// A reserved password attempt.
///
/// Settle it with [`AttemptPermit::succeeded`] or [`AttemptPermit::failed`].
/// Dropping it unsettled releases the slot without recording a failure.
#[derive(Debug)]
pub struct AttemptPermit<'a> {
    limiter: &'a RateLimiter,
    ip: IpAddr,
    settled: bool,
}

impl AttemptPermit<'_> {
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The password matched: forget this IP's failures
    pub fn succeeded(mut self) {
        self.settled = true;
        self.limiter
            .settle(self.ip, Settlement::Succeeded, Instant::now());
    }

    /// The password did not match; returns the failure count in the current window
    pub fn failed(mut self) -> u32 {
        self.settled = true;
        self.limiter.settle(self.ip, Settlement::Failed, Instant::now())
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter
                .settle(self.ip, Settlement::Abandoned, Instant::now());
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    attempts: DashMap<IpAddr, FailureWindow>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `ip` may attempt a password right now. Reserves nothing.
    pub fn check(&self, ip: IpAddr) -> RateLimitStatus {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitStatus {
        let Some(entry) = self.attempts.get(&ip).map(|e| *e) else {
            return RateLimitStatus::Allowed;
        };

        let elapsed = now.saturating_duration_since(entry.opened_at);
        if elapsed >= self.window {
            if entry.in_flight == 0 {
                self.attempts
                    .remove_if(&ip, |_, w| w.opened_at == entry.opened_at && w.in_flight == 0);
            }
            return if entry.in_flight >= self.max_attempts {
                RateLimitStatus::Limited {
                    retry_after: self.window,
                }
            } else {
                RateLimitStatus::Allowed
            };
        }

        if entry.used() >= self.max_attempts {
            RateLimitStatus::Limited {
                retry_after: self.window - elapsed,
            }
        } else {
            RateLimitStatus::Allowed
        }
    }

    /// Reserve one password attempt for `ip`.
    ///
    /// The check and the reservation happen under the same map entry lock.
    /// Returns the time until the window closes when the IP is limited.
    pub fn try_acquire(&self, ip: IpAddr) -> Result<AttemptPermit<'_>, Duration> {
        self.try_acquire_at(ip, Instant::now())
    }

    pub fn try_acquire_at(&self, ip: IpAddr, now: Instant) -> Result<AttemptPermit<'_>, Duration> {
        let mut entry = self
            .attempts
            .entry(ip)
            .or_insert_with(|| FailureWindow::new(now));

        let elapsed = now.saturating_duration_since(entry.opened_at);
        if elapsed >= self.window {
            entry.opened_at = now;
            entry.failures = 0;
        }

        if entry.used() >= self.max_attempts {
            let elapsed = now.saturating_duration_since(entry.opened_at);
            let retry_after = self.window.saturating_sub(elapsed);
            debug!(%ip, failures = entry.failures, in_flight = entry.in_flight, "Password attempt refused");
            return Err(retry_after);
        }

        entry.in_flight += 1;
        Ok(AttemptPermit {
            limiter: self,
            ip,
            settled: false,
        })
    }

    fn settle(&self, ip: IpAddr, settlement: Settlement, now: Instant) -> u32 {
        let mut entry = self
            .attempts
            .entry(ip)
            .or_insert_with(|| FailureWindow::new(now));
        entry.in_flight = entry.in_flight.saturating_sub(1);

        match settlement {
            Settlement::Succeeded => entry.failures = 0,
            Settlement::Failed => {
                let expired = now.saturating_duration_since(entry.opened_at) >= self.window;
                if entry.failures == 0 || expired {
                    entry.opened_at = now;
                    entry.failures = 0;
                }
                entry.failures += 1;
                debug!(%ip, failures = entry.failures, "Recorded failed password attempt");
            }
            Settlement::Abandoned => {}
        }

        let failures = entry.failures;
        let idle = entry.is_idle();
        drop(entry);

        if idle {
            self.attempts.remove_if(&ip, |_, w| w.is_idle());
        }
        failures
    }

    /// Record one failed attempt and return the failure count in the current window
    pub fn record_failure(&self, ip: IpAddr) -> u32 {
        self.record_failure_at(ip, Instant::now())
    }

    pub fn record_failure_at(&self, ip: IpAddr, now: Instant) -> u32 {
        let mut entry = self
            .attempts
            .entry(ip)
            .or_insert_with(|| FailureWindow::new(now));
        let expired = now.saturating_duration_since(entry.opened_at) >= self.window;
        if entry.failures == 0 || expired {
            entry.opened_at = now;
            entry.failures = 0;
        }
        entry.failures += 1;
        debug!(%ip, failures = entry.failures, "Recorded failed password attempt");
        entry.failures
    }

    pub fn clear(&self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }

    /// Drop every tracked IP
    pub fn reset(&self) {
        self.attempts.clear();
    }

    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }

    /// Spawn the periodic full reset, one tick per window.
    ///
    /// Runs until the runtime shuts down.
    pub fn spawn_cleanup(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let tracked = self.tracked();
                self.reset();
                if tracked > 0 {
                    info!(tracked, "Reset password rate limiter");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    #[test]
    fn test_limited_after_max_failures() {
        let limiter = RateLimiter::new(5, Duration::from_secs(900));
        let now = Instant::now();

        for attempt in 1..=5 {
            assert_eq!(limiter.check_at(ip(1), now), RateLimitStatus::Allowed);
            assert_eq!(limiter.record_failure_at(ip(1), now), attempt);
        }

        assert!(limiter.check_at(ip(1), now).is_limited());
    }

    #[test]
    fn test_other_ips_unaffected() {
        let limiter = RateLimiter::new(5, Duration::from_secs(900));
        let now = Instant::now();
        for _ in 0..5 {
            limiter.record_failure_at(ip(1), now);
        }

        assert!(limiter.check_at(ip(1), now).is_limited());
        assert_eq!(limiter.check_at(ip(2), now), RateLimitStatus::Allowed);
    }

    #[test]
    fn test_clear_unblocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(900));
        limiter.record_failure(ip(1));
        limiter.record_failure(ip(1));
        assert!(limiter.check(ip(1)).is_limited());

        limiter.clear(ip(1));
        assert_eq!(limiter.check(ip(1)), RateLimitStatus::Allowed);
    }

    #[test]
    fn test_window_expiry_unblocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.record_failure_at(ip(1), start);
        limiter.record_failure_at(ip(1), start);

        match limiter.check_at(ip(1), start + Duration::from_secs(20)) {
            RateLimitStatus::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(40))
            }
            other => panic!("expected limited, got {:?}", other),
        }

        let after = start + Duration::from_secs(61);
        assert_eq!(limiter.check_at(ip(1), after), RateLimitStatus::Allowed);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_failure_after_window_starts_new_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        limiter.record_failure_at(ip(1), start);
        limiter.record_failure_at(ip(1), start);

        let count = limiter.record_failure_at(ip(1), start + Duration::from_secs(90));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_acquire_counts_in_flight_attempts() {
        let limiter = RateLimiter::new(3, Duration::from_secs(900));
        let now = Instant::now();

        let permits: Vec<_> = (0..3)
            .map(|_| limiter.try_acquire_at(ip(1), now).unwrap())
            .collect();
        assert!(limiter.try_acquire_at(ip(1), now).is_err());
        assert!(limiter.check_at(ip(1), now).is_limited());
        assert!(limiter.try_acquire_at(ip(2), now).is_ok());

        let counts: Vec<u32> = permits.into_iter().map(|p| p.failed()).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(limiter.try_acquire(ip(1)).is_err());
    }

    #[test]
    fn test_dropped_permit_releases_slot() {
        let limiter = RateLimiter::new(1, Duration::from_secs(900));

        let permit = limiter.try_acquire(ip(1)).unwrap();
        assert!(limiter.try_acquire(ip(1)).is_err());
        drop(permit);

        assert_eq!(limiter.tracked(), 0);
        assert!(limiter.try_acquire(ip(1)).is_ok());
    }

    #[test]
    fn test_successful_attempt_clears_failures() {
        let limiter = RateLimiter::new(3, Duration::from_secs(900));
        limiter.record_failure(ip(1));
        limiter.record_failure(ip(1));

        limiter.try_acquire(ip(1)).unwrap().succeeded();

        assert_eq!(limiter.tracked(), 0);
        assert_eq!(limiter.check(ip(1)), RateLimitStatus::Allowed);
    }

    #[test]
    fn test_refused_attempt_reports_remaining_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        limiter.record_failure_at(ip(1), start);

        let retry_after = limiter
            .try_acquire_at(ip(1), start + Duration::from_secs(15))
            .unwrap_err();
        assert_eq!(retry_after, Duration::from_secs(45));

        assert!(limiter
            .try_acquire_at(ip(1), start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_limit() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(900)));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    match limiter.try_acquire(ip(9)) {
                        Ok(permit) => {
                            std::thread::sleep(Duration::from_millis(20));
                            permit.failed();
                            true
                        }
                        Err(_) => false,
                    }
                })
            })
            .collect();

        let verified = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|acquired| *acquired)
            .count();
        assert_eq!(verified, 5);
        assert!(limiter.check(ip(9)).is_limited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_resets_table() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        limiter.record_failure(ip(1));
        let handle = limiter.clone().spawn_cleanup();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked(), 0);
        handle.abort();
    }
}
