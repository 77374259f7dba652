use clap::Args;
use colored::Colorize;
use tracing::info;

use super::{DatabaseArgs, Session};

#[derive(Args)]
pub struct MigrateCommand {
    #[command(flatten)]
    pub database: DatabaseArgs,
}

impl MigrateCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        // Connecting brings the schema up to date
        Session::open(&self.database)?;
        info!("Schema is up to date");
        println!("{}", "✅ Migrations applied".bright_green());
        Ok(())
    }
}

#[derive(Args)]
pub struct HealthCommand {
    #[command(flatten)]
    pub database: DatabaseArgs,
}

impl HealthCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        match session
            .rt
            .block_on(temps_database::check_health(session.db.as_ref()))
        {
            Ok(()) => {
                println!("{}", "✅ Database reachable".bright_green());
                Ok(())
            }
            Err(e) => {
                let message = e.operator_message();
                println!("{} {}", "❌ Database unreachable:".bright_red().bold(), message);
                Err(anyhow::anyhow!(message))
            }
        }
    }
}
