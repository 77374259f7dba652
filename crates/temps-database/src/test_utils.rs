//! Test utilities for database integration tests
//!
//! `TestDatabase::in_memory()` gives every test its own migrated SQLite
//! database. `TestDatabase::with_migrations()` runs against a shared
//! PostgreSQL container for tests that need row locking.

use crate::DbConnection;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use temps_migrations::Migrator;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};
use tokio::sync::{Mutex, OnceCell};

/// Shared test database container that lives for the duration of the test run
static TEST_CONTAINER: OnceCell<Arc<Mutex<SharedContainer>>> = OnceCell::const_new();

/// Global migration lock to ensure only one test runs migrations at a time
static MIGRATION_LOCK: OnceCell<Arc<Mutex<()>>> = OnceCell::const_new();

struct SharedContainer {
    #[allow(dead_code)]
    container: ContainerAsync<GenericImage>,
    database_url: String,
}

impl SharedContainer {
    async fn new() -> anyhow::Result<Self> {
        let db_name = "test_db";
        let username = "test_user";
        let password = "test_password";

        let postgres_container = GenericImage::new("postgres", "17-alpine")
            .with_env_var("POSTGRES_DB", db_name)
            .with_env_var("POSTGRES_USER", username)
            .with_env_var("POSTGRES_PASSWORD", password)
            .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
            .start()
            .await?;

        let port = postgres_container.get_host_port_ipv4(5432).await?;
        let database_url = format!(
            "postgresql://{}:{}@localhost:{}/{}",
            username, password, port, db_name
        );

        // Wait for the database to be ready
        tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;

        Ok(Self {
            container: postgres_container,
            database_url,
        })
    }
}

/// Test database handle
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    pub database_url: String,
}

impl TestDatabase {
    /// Private, migrated SQLite database held in a single pooled connection.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let database_url = "sqlite::memory:".to_string();
        let mut opt = ConnectOptions::new(database_url.clone());
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(TestDatabase {
            db: Arc::new(db),
            database_url,
        })
    }

    async fn get_or_create_container() -> anyhow::Result<Arc<Mutex<SharedContainer>>> {
        TEST_CONTAINER
            .get_or_try_init(|| async {
                let container = SharedContainer::new().await?;
                Ok(Arc::new(Mutex::new(container)))
            })
            .await
            .map(Arc::clone)
    }

    /// Connects to the shared PostgreSQL container, migrates once and wipes
    /// every PKI table.
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let container = Self::get_or_create_container().await?;
        let database_url = container.lock().await.database_url.clone();

        let db = Self::connect_with_retry(&database_url, 20).await?;
        let test_db = TestDatabase {
            db: Arc::new(db),
            database_url,
        };

        let migration_lock = MIGRATION_LOCK
            .get_or_init(|| async { Arc::new(Mutex::new(())) })
            .await;
        {
            let _lock = migration_lock.lock().await;
            Migrator::up(&*test_db.db, None)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        }

        test_db.cleanup_all_tables().await?;
        Ok(test_db)
    }

    async fn connect_with_retry(
        database_url: &str,
        max_retries: u32,
    ) -> anyhow::Result<DbConnection> {
        use std::time::Duration;

        let mut retries = max_retries;
        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(5)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        loop {
            match Database::connect(opt.clone()).await {
                Ok(db) => match db.ping().await {
                    Ok(()) => return Ok(db),
                    Err(e) if retries > 0 => {
                        eprintln!(
                            "Database connected but ping failed (retries left: {}): {}",
                            retries, e
                        );
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!("Database connected but not responsive: {}", e));
                    }
                },
                Err(e) if retries > 0 => {
                    eprintln!("Failed to connect to database (retries left: {}): {}", retries, e);
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to connect to database: {}", e));
                }
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Execute raw SQL against the test database
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let backend = self.db.get_database_backend();
        let statement = Statement::from_string(backend, sql.to_owned());
        Ok(self.db.execute(statement).await?)
    }

    /// Deletes every PKI row and re-seeds the placeholder SCEP server.
    pub async fn cleanup_all_tables(&self) -> anyhow::Result<()> {
        for table in [
            "pki_revoked_certs",
            "pki_certs",
            "pki_profiles",
            "pki_cas",
        ] {
            self.execute_sql(&format!("DELETE FROM {}", table)).await?;
        }
        self.execute_sql("DELETE FROM pki_scep_servers WHERE id <> 1")
            .await?;
        Ok(())
    }

    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    pub fn connection_arc(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }
}
