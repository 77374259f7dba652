use clap::{Args, Subcommand};
use colored::Colorize;
use temps_entities::pki_profiles;
use temps_pki::crypto::{KeyType, SignatureAlgorithm};
use temps_pki::{NewProfile, ProfileRef, ProfileUpdate};

use super::{print_field, print_header, DatabaseArgs, Session, SubjectArgs};

#[derive(Args)]
pub struct ProfileCommand {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: ProfileCommands,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Create a profile under a CA
    Create(CreateProfileArgs),
    /// List profiles
    List,
    /// Show one profile, by id or name
    Show(ProfileArgs),
    /// Update mutable profile settings
    Update(UpdateProfileArgs),
}

#[derive(Args)]
struct CreateProfileArgs {
    #[arg(long)]
    name: String,

    /// Issuing CA id
    #[arg(long)]
    ca: i32,

    /// Comma separated recipients and SAN emails
    #[arg(long)]
    mail: Option<String>,

    #[command(flatten)]
    subject: SubjectArgs,

    /// Validity of issued certificates in days
    #[arg(long, default_value_t = 365)]
    validity: i32,

    #[arg(long, default_value = "RSA")]
    key_type: String,

    #[arg(long, default_value_t = 2048)]
    key_size: i32,

    #[arg(long, default_value_t = 0)]
    digest: i32,

    #[arg(long)]
    key_usage: Option<String>,

    #[arg(long)]
    extended_key_usage: Option<String>,

    #[arg(long)]
    ocsp_url: Option<String>,

    /// Accept SCEP enrollments
    #[arg(long)]
    scep: bool,

    #[arg(long)]
    scep_challenge_password: Option<String>,

    /// Disable renewal reminder mails
    #[arg(long)]
    no_renewal_mail: bool,
}

#[derive(Args)]
struct ProfileArgs {
    /// Profile id or name
    profile: String,
}

#[derive(Args)]
struct UpdateProfileArgs {
    /// Profile id or name
    profile: String,

    #[arg(long)]
    mail: Option<String>,

    #[arg(long)]
    validity: Option<i32>,

    #[arg(long)]
    days_before_renewal: Option<i32>,

    #[arg(long)]
    days_before_renewal_mail: Option<i32>,

    #[arg(long)]
    renewal_mail: Option<bool>,

    #[arg(long)]
    scep: Option<bool>,

    #[arg(long)]
    scep_challenge_password: Option<String>,

    #[arg(long)]
    revoked_valid_until: Option<i32>,
}

fn profile_ref(value: &str) -> ProfileRef {
    match value.parse::<i32>() {
        Ok(id) => ProfileRef::Id(id),
        Err(_) => ProfileRef::Name(value.to_string()),
    }
}

fn print_profile(profile: &pki_profiles::Model) {
    print_header(&format!("Profile {} (id {})", profile.name, profile.id));
    print_field("CA", format!("{} (id {})", profile.ca_name, profile.ca_id));
    print_field(
        "Key",
        format!("{} {}", profile.key_type, profile.key_size),
    );
    print_field("Validity", format!("{} days", profile.validity));
    print_field("Renewal window", format!("{} days", profile.days_before_renewal));
    print_field(
        "Renewal mail",
        if profile.renewal_mail {
            format!("{} days before expiry", profile.days_before_renewal_mail)
        } else {
            "off".to_string()
        },
    );
    print_field("SCEP", if profile.scep_enabled { "enabled" } else { "disabled" });
}

impl ProfileCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let session = Session::open(&self.database)?;
        let profiles = session.services().profiles;

        match self.command {
            ProfileCommands::Create(args) => {
                let request = NewProfile {
                    mail: args.mail,
                    subject: args.subject.into(),
                    validity: args.validity,
                    key_type: args.key_type.parse::<KeyType>()?,
                    key_size: args.key_size,
                    digest: SignatureAlgorithm::from_code(args.digest)?,
                    key_usage: args.key_usage,
                    extended_key_usage: args.extended_key_usage,
                    ocsp_url: args.ocsp_url,
                    scep_enabled: args.scep,
                    scep_challenge_password: args.scep_challenge_password,
                    renewal_mail: !args.no_renewal_mail,
                    ..NewProfile::new(args.name, args.ca)
                };
                let profile = session.run(profiles.create_profile(request))?;
                println!("{}", "✅ Profile created".bright_green());
                print_profile(&profile);
            }
            ProfileCommands::List => {
                for profile in session.run(profiles.list_profiles())? {
                    println!(
                        "{:>4}  {}  {}",
                        profile.id,
                        profile.name.bright_cyan(),
                        profile.ca_name
                    );
                }
            }
            ProfileCommands::Show(args) => {
                let profile = match profile_ref(&args.profile) {
                    ProfileRef::Id(id) => session.run(profiles.get_profile(id))?,
                    ProfileRef::Name(name) => session.run(profiles.get_profile_by_name(&name))?,
                };
                print_profile(&profile);
            }
            ProfileCommands::Update(args) => {
                let update = ProfileUpdate {
                    mail: args.mail,
                    validity: args.validity,
                    days_before_renewal: args.days_before_renewal,
                    days_before_renewal_mail: args.days_before_renewal_mail,
                    renewal_mail: args.renewal_mail,
                    scep_enabled: args.scep,
                    scep_challenge_password: args.scep_challenge_password,
                    revoked_valid_until: args.revoked_valid_until,
                    ..Default::default()
                };
                let profile =
                    session.run(profiles.update_profile(profile_ref(&args.profile), update))?;
                println!("{}", "✅ Profile updated".bright_green());
                print_profile(&profile);
            }
        }
        Ok(())
    }
}
