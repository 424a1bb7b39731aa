//! Persisted port record

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "port_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub port: i32,

    pub owner_project_id: Option<String>,

    pub process_id: Option<i64>,

    pub process_name: Option<String>,

    /// `private`, `password` or `public`; anything else reads back as private
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub share_mode: String,

    /// Argon2id PHC string, present only in password mode
    #[sea_orm(column_type = "Text", nullable)]
    pub password_hash: Option<String>,

    pub expires_at: Option<ChronoDateTimeUtc>,

    pub first_seen: ChronoDateTimeUtc,

    pub last_seen: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
