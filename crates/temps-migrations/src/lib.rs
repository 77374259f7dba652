//! Database migrations for the PKI tables

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
