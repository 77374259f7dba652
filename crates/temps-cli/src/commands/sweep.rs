use clap::Args;
use colored::Colorize;
use tracing::info;

use super::{DatabaseArgs, Session};

#[derive(Args)]
pub struct SweepCommand {
    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Keep running and sweep every TEMPS_PKI_RENEWAL_INTERVAL seconds until Ctrl+C
    #[arg(long)]
    pub watch: bool,
}

impl SweepCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        let services = session.services();

        if !self.watch {
            let report = session.run(services.renewal.check_renewal())?;
            println!("{} {}", "Renewal sweep:".bright_white().bold(), report);
            return Ok(());
        }

        session.rt.block_on(async {
            let scheduler = services.start_renewal_scheduler();
            info!("Renewal scheduler running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, stopping renewal scheduler");
            scheduler.stop();
            Ok::<(), anyhow::Error>(())
        })
    }
}
