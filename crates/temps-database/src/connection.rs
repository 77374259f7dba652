//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use temps_core::{DatabaseConfig, ServiceError, ServiceResult};
use temps_migrations::{Migrator, MigratorTrait};
use tracing::{debug, info};

pub type DbConnection = DatabaseConnection;

pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    establish_connection_with_config(&DatabaseConfig::new(database_url)).await
}

/// Connects with explicit pool settings and brings the schema up to date.
pub async fn establish_connection_with_config(
    config: &DatabaseConfig,
) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(config.url.clone());
    if config.is_sqlite_memory() {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(ServiceError::database)?;
    debug!("Database connection established");

    // Run migrations
    Migrator::up(&db, None)
        .await
        .map_err(ServiceError::database)?;
    info!("Database migrations applied");

    Ok(Arc::new(db))
}

/// Round-trips a ping to the database.
pub async fn check_health(db: &DbConnection) -> ServiceResult<()> {
    db.ping()
        .await
        .map_err(ServiceError::database)
}
