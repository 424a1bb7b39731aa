//! In-memory registry backed by a concurrent map

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use homeport_proto::{ObservedPort, PortRecord, ShareSettings};
use tracing::debug;

use crate::{PortRegistry, RegistryResult};

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: DashMap<u16, PortRecord>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Put a record in place as-is
    pub fn insert(&self, record: PortRecord) {
        self.records.insert(record.port, record);
    }
}

#[async_trait]
impl PortRegistry for MemoryRegistry {
    async fn get(&self, port: u16) -> RegistryResult<Option<PortRecord>> {
        Ok(self.records.get(&port).map(|r| r.clone()))
    }

    async fn list(&self) -> RegistryResult<Vec<PortRecord>> {
        let mut records: Vec<PortRecord> = self.records.iter().map(|r| r.clone()).collect();
        records.sort_by_key(|r| r.port);
        Ok(records)
    }

    async fn upsert_observed(
        &self,
        observed: &ObservedPort,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord> {
        let mut entry = self
            .records
            .entry(observed.port)
            .or_insert_with(|| {
                debug!(port = observed.port, "New port observed");
                PortRecord::from_observation(observed, now)
            });
        entry.refresh(observed, now);
        Ok(entry.clone())
    }

    async fn set_share(
        &self,
        port: u16,
        settings: &ShareSettings,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord> {
        let mut entry = self
            .records
            .entry(port)
            .or_insert_with(|| PortRecord::unobserved(port, now));
        entry.apply_share(settings);
        Ok(entry.clone())
    }

    async fn unshare(&self, port: u16) -> RegistryResult<Option<PortRecord>> {
        let Some(mut entry) = self.records.get_mut(&port) else {
            return Ok(None);
        };
        if !entry.is_private_at_rest() {
            entry.apply_share(&ShareSettings::private());
        }
        Ok(Some(entry.clone()))
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<u16>> {
        let stale: Vec<u16> = self
            .records
            .iter()
            .filter(|r| r.is_stale(cutoff))
            .map(|r| r.port)
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for port in stale {
            // Re-check under the shard lock; an upsert may have landed since.
            if self
                .records
                .remove_if(&port, |_, r| r.is_stale(cutoff))
                .is_some()
            {
                removed.push(port);
            }
        }
        removed.sort_unstable();
        Ok(removed)
    }
}
