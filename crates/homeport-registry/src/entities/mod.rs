//! SeaORM entities

pub mod port_record;

pub use port_record::Entity as PortRecordEntity;
