//! SQL registry over SeaORM
//!
//! Each mutation reads the current row, applies the same record rules the
//! in-memory backend uses, and writes the row back inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homeport_proto::{ObservedPort, PortRecord, ShareMode, ShareSettings};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;

use crate::entities::port_record::{self, Entity as PortRecords};
use crate::{PortRegistry, RegistryError, RegistryResult};

#[derive(Debug, Clone)]
pub struct DbRegistry {
    db: DatabaseConnection,
}

impl DbRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connect to `database_url` and apply pending migrations
    pub async fn open(database_url: &str) -> RegistryResult<Self> {
        let db = crate::connect(database_url).await?;
        crate::migrate(&db).await?;
        Ok(Self::new(db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn find(txn: &DatabaseTransaction, port: u16) -> RegistryResult<Option<PortRecord>> {
        PortRecords::find_by_id(i32::from(port))
            .one(txn)
            .await?
            .map(to_record)
            .transpose()
    }

    async fn write(
        txn: &DatabaseTransaction,
        record: &PortRecord,
        exists: bool,
    ) -> RegistryResult<()> {
        let model = to_active(record);
        if exists {
            model.update(txn).await?;
        } else {
            model.insert(txn).await?;
        }
        Ok(())
    }
}

fn to_record(model: port_record::Model) -> RegistryResult<PortRecord> {
    let port = u16::try_from(model.port).map_err(|_| RegistryError::Corrupt {
        port: i64::from(model.port),
        reason: "port out of range".to_string(),
    })?;

    Ok(PortRecord {
        port,
        owner_project_id: model.owner_project_id,
        process_id: model.process_id.and_then(|pid| u32::try_from(pid).ok()),
        process_name: model.process_name,
        share_mode: ShareMode::from_stored(&model.share_mode),
        password_hash: model.password_hash,
        expires_at: model.expires_at,
        first_seen: model.first_seen,
        last_seen: model.last_seen,
    })
}

fn to_active(record: &PortRecord) -> port_record::ActiveModel {
    port_record::ActiveModel {
        port: Set(i32::from(record.port)),
        owner_project_id: Set(record.owner_project_id.clone()),
        process_id: Set(record.process_id.map(i64::from)),
        process_name: Set(record.process_name.clone()),
        share_mode: Set(record.share_mode.as_str().to_string()),
        password_hash: Set(record.password_hash.clone()),
        expires_at: Set(record.expires_at),
        first_seen: Set(record.first_seen),
        last_seen: Set(record.last_seen),
    }
}

#[async_trait]
impl PortRegistry for DbRegistry {
    async fn get(&self, port: u16) -> RegistryResult<Option<PortRecord>> {
        PortRecords::find_by_id(i32::from(port))
            .one(&self.db)
            .await?
            .map(to_record)
            .transpose()
    }

    async fn list(&self) -> RegistryResult<Vec<PortRecord>> {
        PortRecords::find()
            .order_by_asc(port_record::Column::Port)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_record)
            .collect()
    }

    async fn upsert_observed(
        &self,
        observed: &ObservedPort,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord> {
        let txn = self.db.begin().await?;

        let (record, exists) = match Self::find(&txn, observed.port).await? {
            Some(mut record) => {
                record.refresh(observed, now);
                (record, true)
            }
            None => {
                debug!(port = observed.port, "New port observed");
                (PortRecord::from_observation(observed, now), false)
            }
        };
        Self::write(&txn, &record, exists).await?;

        txn.commit().await?;
        Ok(record)
    }

    async fn set_share(
        &self,
        port: u16,
        settings: &ShareSettings,
        now: DateTime<Utc>,
    ) -> RegistryResult<PortRecord> {
        let txn = self.db.begin().await?;

        let (mut record, exists) = match Self::find(&txn, port).await? {
            Some(record) => (record, true),
            None => (PortRecord::unobserved(port, now), false),
        };
        record.apply_share(settings);
        Self::write(&txn, &record, exists).await?;

        txn.commit().await?;
        Ok(record)
    }

    async fn unshare(&self, port: u16) -> RegistryResult<Option<PortRecord>> {
        let txn = self.db.begin().await?;

        let Some(mut record) = Self::find(&txn, port).await? else {
            txn.rollback().await?;
            return Ok(None);
        };
        if !record.is_private_at_rest() {
            record.apply_share(&ShareSettings::private());
            Self::write(&txn, &record, true).await?;
        }

        txn.commit().await?;
        Ok(Some(record))
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<u16>> {
        let txn = self.db.begin().await?;

        let stale: Vec<i32> = PortRecords::find()
            .select_only()
            .column(port_record::Column::Port)
            .filter(port_record::Column::LastSeen.lt(cutoff))
            .order_by_asc(port_record::Column::Port)
            .into_tuple()
            .all(&txn)
            .await?;

        if !stale.is_empty() {
            PortRecords::delete_many()
                .filter(port_record::Column::Port.is_in(stale.clone()))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(stale
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }
}
