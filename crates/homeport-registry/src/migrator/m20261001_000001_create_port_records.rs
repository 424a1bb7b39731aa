//! Migration to create the port_records table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PortRecords::Table)
                    .if_not_exists()
                    .col(integer(PortRecords::Port).primary_key())
                    .col(string_null(PortRecords::OwnerProjectId))
                    .col(big_integer_null(PortRecords::ProcessId))
                    .col(string_null(PortRecords::ProcessName))
                    .col(
                        string_len(PortRecords::ShareMode, 16)
                            .not_null()
                            .default("private"),
                    )
                    .col(text_null(PortRecords::PasswordHash))
                    .col(timestamp_with_time_zone_null(PortRecords::ExpiresAt))
                    .col(timestamp_with_time_zone(PortRecords::FirstSeen).not_null())
                    .col(timestamp_with_time_zone(PortRecords::LastSeen).not_null())
                    .to_owned(),
            )
            .await?;

        // Staleness reconciliation filters on last_seen every scan
        manager
            .create_index(
                Index::create()
                    .name("idx_port_records_last_seen")
                    .table(PortRecords::Table)
                    .col(PortRecords::LastSeen)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PortRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PortRecords {
    Table,
    Port,
    OwnerProjectId,
    ProcessId,
    ProcessName,
    ShareMode,
    PasswordHash,
    ExpiresAt,
    FirstSeen,
    LastSeen,
}
