pub mod ca;
pub mod cert;
pub mod database;
pub mod profile;
pub mod scep_server;
pub mod sweep;

pub use ca::CaCommand;
pub use cert::CertCommand;
pub use database::{HealthCommand, MigrateCommand};
pub use profile::ProfileCommand;
pub use scep_server::ScepServerCommand;
pub use sweep::SweepCommand;

use clap::Args;
use colored::Colorize;
use std::future::Future;
use std::sync::Arc;
use temps_database::DbConnection;
use temps_pki::{PkiConfig, PkiServices};
use tracing::debug;

#[derive(Args, Clone)]
pub struct DatabaseArgs {
    /// Database connection URL
    #[arg(long, env = "TEMPS_DATABASE_URL")]
    pub database_url: String,
}

/// A runtime with a migrated connection, shared by every subcommand.
pub struct Session {
    pub rt: tokio::runtime::Runtime,
    pub db: Arc<DbConnection>,
}

impl Session {
    pub fn open(args: &DatabaseArgs) -> anyhow::Result<Self> {
        debug!("Initializing database connection...");
        let rt = tokio::runtime::Runtime::new()?;
        let db = rt
            .block_on(temps_database::establish_connection(&args.database_url))
            .map_err(|e| anyhow::anyhow!(e.operator_message()))?;
        Ok(Self { rt, db })
    }

    pub fn services(&self) -> PkiServices {
        PkiServices::new(self.db.clone(), PkiConfig::from_env())
    }

    pub fn run<F, T>(&self, future: F) -> anyhow::Result<T>
    where
        F: Future<Output = temps_pki::PkiResult<T>>,
    {
        Ok(self.rt.block_on(future)?)
    }
}

fn print_header(title: &str) {
    println!();
    println!("{}", title.bright_white().bold());
    println!("{}", "─".repeat(title.chars().count()).bright_green());
}

fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{} {}", format!("{}:", label).bright_white().bold(), value);
}

/// Distinguished name attributes other than the common name.
#[derive(Args, Clone, Default)]
pub struct SubjectArgs {
    #[arg(long = "org")]
    pub organisation: Option<String>,
    #[arg(long = "ou")]
    pub organisational_unit: Option<String>,
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub locality: Option<String>,
    #[arg(long)]
    pub street_address: Option<String>,
    #[arg(long)]
    pub postal_code: Option<String>,
}

impl From<SubjectArgs> for temps_pki::crypto::SubjectAttributes {
    fn from(args: SubjectArgs) -> Self {
        Self {
            organisation: args.organisation,
            organisational_unit: args.organisational_unit,
            country: args.country,
            state: args.state,
            locality: args.locality,
            street_address: args.street_address,
            postal_code: args.postal_code,
        }
    }
}
