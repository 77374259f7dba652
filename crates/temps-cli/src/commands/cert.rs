use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use temps_entities::pki_certs;
use temps_pki::{CertRef, IssueRequest, Pkcs12Delivery};

use super::{print_field, print_header, DatabaseArgs, Session, SubjectArgs};

#[derive(Args)]
pub struct CertCommand {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: CertCommands,
}

#[derive(Subcommand)]
enum CertCommands {
    /// Generate a key pair and issue a certificate
    Issue(IssueArgs),
    /// Sign a PEM certificate request
    SignCsr(SignCsrArgs),
    /// Re-sign an active certificate for its existing key
    Resign(ResignArgs),
    /// Revoke an active certificate
    Revoke(RevokeArgs),
    /// Export a certificate with its key and chain as PKCS#12
    Export(ExportArgs),
    /// List active certificates of a profile
    List(ListArgs),
    /// Show one active certificate
    Show(CertSelector),
}

#[derive(Args)]
struct IssueArgs {
    /// Profile id or name
    #[arg(long)]
    profile: String,

    #[arg(long)]
    cn: String,

    /// Comma separated SAN emails, replacing the profile mail
    #[arg(long)]
    mail: Option<String>,

    #[arg(long = "dns", value_delimiter = ',')]
    dns_names: Vec<String>,

    #[arg(long = "ip", value_delimiter = ',')]
    ip_addresses: Vec<String>,

    #[command(flatten)]
    subject: SubjectArgs,
}

#[derive(Args)]
struct SignCsrArgs {
    #[arg(long)]
    profile: String,

    /// PEM CSR file
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args)]
struct ResignArgs {
    id: i32,

    #[command(flatten)]
    subject: SubjectArgs,
}

#[derive(Args)]
struct CertSelector {
    /// Certificate id
    #[arg(long, conflicts_with_all = ["cn", "profile"])]
    id: Option<i32>,

    #[arg(long, requires = "profile")]
    cn: Option<String>,

    /// Profile name
    #[arg(long, requires = "cn")]
    profile: Option<String>,
}

impl CertSelector {
    fn cert_ref(&self) -> anyhow::Result<CertRef> {
        match (&self.id, &self.cn, &self.profile) {
            (Some(id), _, _) => Ok(CertRef::Id(*id)),
            (None, Some(cn), Some(profile)) => Ok(CertRef::identity(cn, profile)),
            _ => anyhow::bail!("select a certificate with --id or --cn and --profile"),
        }
    }
}

#[derive(Args)]
struct RevokeArgs {
    #[command(flatten)]
    selector: CertSelector,

    /// CRL reason code (0-6, 8-10)
    #[arg(long, default_value_t = 0)]
    reason: i32,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    selector: CertSelector,

    /// Bundle password; without one the bundle is mailed with a generated password
    #[arg(long, env = "TEMPS_PKI_EXPORT_PASSWORD")]
    password: Option<String>,

    /// Where to write the bundle
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ListArgs {
    /// Profile id
    profile_id: i32,
}

fn print_cert(cert: &pki_certs::Model) {
    print_header(&format!("Certificate {} (id {})", cert.cn, cert.id));
    print_field("Subject", &cert.subject);
    print_field("Profile", &cert.profile_name);
    print_field("CA", &cert.ca_name);
    print_field("Serial", cert.serial_number);
    print_field("Not before", cert.not_before);
    print_field("Valid until", cert.valid_until);
    if let Some(dns) = &cert.dns_names {
        print_field("DNS", dns);
    }
    if let Some(ips) = &cert.ip_addresses {
        print_field("IP", ips);
    }
    if let Some(mail) = &cert.mail {
        print_field("Mail", mail);
    }
}

impl CertCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        let services = session.services();

        match self.command {
            CertCommands::Issue(args) => {
                let request = IssueRequest {
                    cn: args.cn,
                    mail: args.mail,
                    dns_names: args.dns_names,
                    ip_addresses: args.ip_addresses,
                    subject: args.subject.into(),
                };
                let cert = session.run(
                    services
                        .issuance
                        .issue(args.profile.as_str(), request),
                )?;
                println!("{}", "✅ Certificate issued".bright_green());
                print_cert(&cert);
            }
            CertCommands::SignCsr(args) => {
                let pem = std::fs::read_to_string(&args.file)?;
                let cert = session.run(services.issuance.sign_csr(args.profile.as_str(), &pem))?;
                println!("{}", "✅ Certificate request signed".bright_green());
                print_cert(&cert);
                println!();
                print!("{}", cert.cert);
            }
            CertCommands::Resign(args) => {
                let cert =
                    session.run(services.issuance.resign_cert(args.id, args.subject.into()))?;
                println!("{}", "✅ Certificate re-signed".bright_green());
                print_cert(&cert);
            }
            CertCommands::Revoke(args) => {
                let revoked = session.run(
                    services
                        .revocation
                        .revoke(args.selector.cert_ref()?, args.reason),
                )?;
                println!("{}", "✅ Certificate revoked".bright_green());
                print_field("Serial", revoked.serial_number);
                print_field("Listed until", revoked.revoked);
            }
            CertCommands::Export(args) => {
                let delivery = session.run(
                    services
                        .export
                        .download(args.selector.cert_ref()?, args.password),
                )?;
                match delivery {
                    Pkcs12Delivery::Bundle { der, .. } => {
                        let out = args
                            .out
                            .ok_or_else(|| anyhow::anyhow!("--out is required with --password"))?;
                        std::fs::write(&out, der)?;
                        println!(
                            "{} {}",
                            "✅ Bundle written to".bright_green(),
                            out.display()
                        );
                    }
                    Pkcs12Delivery::Mailed {
                        recipient,
                        password,
                    } => {
                        println!(
                            "{} {}",
                            "✅ Bundle mailed to".bright_green(),
                            recipient.bright_cyan()
                        );
                        if let Some(password) = password {
                            print_field("Password", password.bright_yellow().bold());
                        }
                    }
                }
            }
            CertCommands::List(args) => {
                let certs = session.run(services.issuance.list_certs_for_profile(args.profile_id))?;
                for cert in certs {
                    println!(
                        "{:>6}  {}  {}  {}",
                        cert.id,
                        cert.cn.bright_cyan(),
                        cert.serial_number,
                        cert.valid_until.format("%Y-%m-%d")
                    );
                }
            }
            CertCommands::Show(selector) => {
                let cert = match selector.cert_ref()? {
                    CertRef::Id(id) => session.run(services.issuance.get_cert(id))?,
                    CertRef::Identity { cn, profile_name } => session.run(
                        services
                            .issuance
                            .get_cert_by_cn(&cn, Some(&profile_name)),
                    )?,
                };
                print_cert(&cert);
                println!();
                print!("{}", cert.cert);
            }
        }
        Ok(())
    }
}
