use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use temps_entities::pki_cas;
use temps_pki::crypto::{KeyType, SignatureAlgorithm};
use temps_pki::NewCa;

use super::{print_field, print_header, DatabaseArgs, Session, SubjectArgs};

#[derive(Args)]
pub struct CaCommand {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: CaCommands,
}

#[derive(Subcommand)]
enum CaCommands {
    /// Create a self-signed certificate authority
    Create(CreateCaArgs),
    /// List certificate authorities
    List,
    /// Show one certificate authority and its certificate
    Show(CaIdArgs),
    /// Re-sign the CA certificate with its existing key
    Resign(CaIdArgs),
    /// Generate a new key and self-signed certificate
    Rekey(CaIdArgs),
    /// Print a CSR for the CA key, to be signed by a parent authority
    Csr(CaIdArgs),
    /// Install a certificate signed by a parent authority
    InstallCert(InstallCertArgs),
    /// Recompute missing issuer hashes
    FixHashes,
}

#[derive(Args)]
struct CreateCaArgs {
    /// Common name, unique among CAs
    #[arg(long)]
    cn: String,

    #[arg(long)]
    mail: Option<String>,

    #[command(flatten)]
    subject: SubjectArgs,

    /// RSA, ECDSA or DSA
    #[arg(long, default_value = "RSA")]
    key_type: String,

    #[arg(long, default_value_t = 4096)]
    key_size: i32,

    /// Signature algorithm code (0 lets the key type decide)
    #[arg(long, default_value_t = 0)]
    digest: i32,

    /// Pipe separated key usage bits
    #[arg(long)]
    key_usage: Option<String>,

    /// Pipe separated extended key usage indices
    #[arg(long)]
    extended_key_usage: Option<String>,

    #[arg(long, default_value_t = 3650)]
    days: i32,

    #[arg(long)]
    ocsp_url: Option<String>,
}

#[derive(Args)]
struct CaIdArgs {
    id: i32,
}

#[derive(Args)]
struct InstallCertArgs {
    id: i32,

    /// PEM certificate file
    #[arg(long)]
    file: PathBuf,
}

fn print_ca(ca: &pki_cas::Model) {
    print_header(&format!("CA {} (id {})", ca.cn, ca.id));
    print_field("Key", format!("{} {}", ca.key_type, ca.key_size));
    print_field("Validity", format!("{} days", ca.days));
    print_field("Next serial", ca.serial_number);
    print_field("Issuer key hash", &ca.issuer_key_hash);
    print_field("Issuer name hash", &ca.issuer_name_hash);
}

impl CaCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        let cas = session.services().cas;

        match self.command {
            CaCommands::Create(args) => {
                let request = NewCa {
                    cn: args.cn,
                    mail: args.mail,
                    subject: args.subject.into(),
                    key_type: args.key_type.parse::<KeyType>()?,
                    key_size: args.key_size,
                    digest: SignatureAlgorithm::from_code(args.digest)?,
                    key_usage: args.key_usage,
                    extended_key_usage: args.extended_key_usage,
                    days: args.days,
                    ocsp_url: args.ocsp_url,
                };
                let ca = session.run(cas.create_ca(request))?;
                println!("{}", "✅ Certificate authority created".bright_green());
                print_ca(&ca);
            }
            CaCommands::List => {
                for ca in session.run(cas.list_cas())? {
                    println!(
                        "{:>4}  {}  {} {}",
                        ca.id,
                        ca.cn.bright_cyan(),
                        ca.key_type,
                        ca.key_size
                    );
                }
            }
            CaCommands::Show(args) => {
                let ca = session.run(cas.get_ca(args.id))?;
                print_ca(&ca);
                println!();
                print!("{}", ca.cert);
            }
            CaCommands::Resign(args) => {
                let ca = session.run(cas.resign_ca(args.id))?;
                println!("{}", "✅ CA certificate re-signed".bright_green());
                print_ca(&ca);
            }
            CaCommands::Rekey(args) => {
                let ca = session.run(cas.rekey_ca(args.id))?;
                println!("{}", "✅ CA key replaced".bright_green());
                println!(
                    "{}",
                    "⚠️  Certificates issued under the previous key no longer chain to this CA"
                        .bright_yellow()
                );
                print_ca(&ca);
            }
            CaCommands::Csr(args) => {
                print!("{}", session.run(cas.generate_csr(args.id))?);
            }
            CaCommands::InstallCert(args) => {
                let pem = std::fs::read_to_string(&args.file)?;
                let ca = session.run(cas.update_ca_cert(args.id, &pem))?;
                println!("{}", "✅ CA certificate installed".bright_green());
                print_ca(&ca);
            }
            CaCommands::FixHashes => {
                let repaired = session.run(cas.fix_issuer_hashes())?;
                print_field("Repaired", repaired);
            }
        }
        Ok(())
    }
}
