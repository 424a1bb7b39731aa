//! Periodic probe and registry reconciliation

use chrono::{DateTime, Utc};
use homeport_proto::PortRange;
use homeport_registry::PortRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{PortProber, ProbeError};

/// Outcome of one scan cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub observed: usize,
    pub upserted: usize,
    pub failed: usize,
    pub removed: Vec<u16>,
}

pub struct Scanner {
    prober: Arc<dyn PortProber>,
    registry: Arc<dyn PortRegistry>,
    range: PortRange,
    interval: Duration,
    stale_after: Duration,
}

impl Scanner {
    pub fn new(
        prober: Arc<dyn PortProber>,
        registry: Arc<dyn PortRegistry>,
        range: PortRange,
    ) -> Self {
        Self {
            prober,
            registry,
            range,
            interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Probe once and reconcile the registry.
    ///
    /// Every observation is upserted; a failed upsert is logged and retried
    /// on the next cycle. Records last seen before `now - stale_after` are
    /// then deleted. A failed probe leaves the registry untouched.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport, ProbeError> {
        let prober = self.prober.clone();
        let range = self.range;
        let observed = tokio::task::spawn_blocking(move || prober.probe(range))
            .await
            .map_err(|e| ProbeError::Task(e.to_string()))??;

        let mut report = ScanReport {
            observed: observed.len(),
            ..Default::default()
        };

        for obs in &observed {
            match self.registry.upsert_observed(obs, now).await {
                Ok(_) => report.upserted += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(port = obs.port, error = %e, "Failed to record observed port");
                }
            }
        }

        let cutoff = now
            - chrono::Duration::from_std(self.stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        match self.registry.delete_stale(cutoff).await {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!(ports = ?removed, "Removed stale ports");
                }
                report.removed = removed;
            }
            Err(e) => warn!(error = %e, "Failed to remove stale ports"),
        }

        debug!(
            observed = report.observed,
            upserted = report.upserted,
            failed = report.failed,
            "Scan complete"
        );
        Ok(report)
    }

    /// Scan on every interval tick until the task is dropped
    pub async fn run(self) {
        info!(
            range = %self.range,
            interval = ?self.interval,
            stale_after = ?self.stale_after,
            "Port scanner started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.scan_once(Utc::now()).await {
                warn!(error = %e, "Port scan failed");
            }
        }
    }
}
