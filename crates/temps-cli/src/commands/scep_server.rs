use clap::{Args, Subcommand};
use colored::Colorize;
use temps_pki::services::{NewScepServer, ScepServerUpdate};

use super::{print_field, DatabaseArgs, Session};

#[derive(Args)]
pub struct ScepServerCommand {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: ScepServerCommands,
}

#[derive(Subcommand)]
enum ScepServerCommands {
    /// Register a remote SCEP server
    Create(CreateArgs),
    /// List registered servers
    List,
    /// Change the URL or shared secret of a server
    Update(UpdateArgs),
    /// Remove a server no profile references
    Delete { id: i32 },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    url: String,

    #[arg(long, env = "TEMPS_PKI_SCEP_SHARED_SECRET")]
    shared_secret: String,
}

#[derive(Args)]
struct UpdateArgs {
    id: i32,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    shared_secret: Option<String>,
}

impl ScepServerCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        let servers = session.services().scep_servers;

        match self.command {
            ScepServerCommands::Create(args) => {
                let server = session.run(servers.create(NewScepServer {
                    name: args.name,
                    url: args.url,
                    shared_secret: args.shared_secret,
                }))?;
                println!("{}", "✅ SCEP server registered".bright_green());
                print_field("Id", server.id);
            }
            ScepServerCommands::List => {
                for server in session.run(servers.list())? {
                    println!(
                        "{:>4}  {}  {}",
                        server.id,
                        server.name.bright_cyan(),
                        server.url
                    );
                }
            }
            ScepServerCommands::Update(args) => {
                let server = session.run(servers.update(
                    args.id,
                    ScepServerUpdate {
                        url: args.url,
                        shared_secret: args.shared_secret,
                    },
                ))?;
                println!("{}", "✅ SCEP server updated".bright_green());
                print_field("URL", server.url);
            }
            ScepServerCommands::Delete { id } => {
                session.run(servers.delete(id))?;
                println!("{}", "✅ SCEP server removed".bright_green());
            }
        }
        Ok(())
    }
}
