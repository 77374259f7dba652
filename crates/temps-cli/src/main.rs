//! temps-pki - administration entrypoint for the certificate authority engine
//!
//! Every subcommand connects to the database (applying pending migrations)
//! and drives the engine services directly.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    CaCommand, CertCommand, HealthCommand, MigrateCommand, ProfileCommand, ScepServerCommand,
    SweepCommand,
};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TEMPS_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "TEMPS_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate(MigrateCommand),
    /// Check database connectivity
    Health(HealthCommand),
    /// Run the renewal sweep once, or periodically with --watch
    Sweep(SweepCommand),
    /// Certificate authority management
    Ca(CaCommand),
    /// Profile management
    Profile(ProfileCommand),
    /// Certificate issuance, revocation and export
    Cert(CertCommand),
    /// Remote SCEP server registry
    ScepServer(ScepServerCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set; otherwise every temps crate logs at --log-level
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "temps_cli={level},\
             temps_pki={level},\
             temps_core={level},\
             temps_entities={level},\
             temps_database={level},\
             temps_migrations={level},\
             sqlx=warn,\
             sea_orm=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global default subscriber: {}", e))?;

    match cli.command {
        Commands::Migrate(cmd) => cmd.execute(),
        Commands::Health(cmd) => cmd.execute(),
        Commands::Sweep(cmd) => cmd.execute(),
        Commands::Ca(cmd) => cmd.execute(),
        Commands::Profile(cmd) => cmd.execute(),
        Commands::Cert(cmd) => cmd.execute(),
        Commands::ScepServer(cmd) => cmd.execute(),
    }
}
