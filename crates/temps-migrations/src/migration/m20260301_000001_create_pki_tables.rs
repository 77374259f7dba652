use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // PKI_SCEP_SERVERS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(PkiScepServers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PkiScepServers::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PkiScepServers::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PkiScepServers::Url).text().not_null())
                    .col(ColumnDef::new(PkiScepServers::SharedSecret).text().not_null())
                    .col(
                        ColumnDef::new(PkiScepServers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PkiScepServers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_scep_servers_name_unique")
                    .table(PkiScepServers::Table)
                    .col(PkiScepServers::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Placeholder server referenced by profiles without a SCEP server (id 1)
        let now = chrono::Utc::now();
        manager
            .exec_stmt(
                Query::insert()
                    .into_table(PkiScepServers::Table)
                    .columns([
                        PkiScepServers::Name,
                        PkiScepServers::Url,
                        PkiScepServers::SharedSecret,
                        PkiScepServers::CreatedAt,
                        PkiScepServers::UpdatedAt,
                    ])
                    .values_panic(["Null".into(), "".into(), "".into(), now.into(), now.into()])
                    .to_owned(),
            )
            .await?;

        // ========================================
        // PKI_CAS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(PkiCas::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PkiCas::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PkiCas::Cn).string_len(255).not_null())
                    .col(ColumnDef::new(PkiCas::Mail).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::Organisation).string_len(255).null())
                    .col(
                        ColumnDef::new(PkiCas::OrganisationalUnit)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PkiCas::Country).string_len(2).null())
                    .col(ColumnDef::new(PkiCas::State).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::Locality).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::StreetAddress).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::PostalCode).string_len(32).null())
                    .col(ColumnDef::new(PkiCas::KeyType).string_len(16).not_null())
                    .col(ColumnDef::new(PkiCas::KeySize).integer().not_null())
                    .col(ColumnDef::new(PkiCas::Digest).integer().not_null().default(0))
                    .col(ColumnDef::new(PkiCas::KeyUsage).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::ExtendedKeyUsage).string_len(255).null())
                    .col(ColumnDef::new(PkiCas::Days).integer().not_null())
                    .col(ColumnDef::new(PkiCas::Key).text().not_null())
                    .col(ColumnDef::new(PkiCas::Cert).text().not_null())
                    .col(
                        ColumnDef::new(PkiCas::IssuerKeyHash)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(PkiCas::IssuerNameHash)
                            .string_len(64)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(PkiCas::OcspUrl).text().null())
                    .col(
                        ColumnDef::new(PkiCas::SerialNumber)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PkiCas::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PkiCas::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_cas_cn_unique")
                    .table(PkiCas::Table)
                    .col(PkiCas::Cn)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ========================================
        // PKI_PROFILES TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(PkiProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PkiProfiles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PkiProfiles::Name).string_len(255).not_null())
                    .col(ColumnDef::new(PkiProfiles::CaId).integer().not_null())
                    .col(ColumnDef::new(PkiProfiles::CaName).string_len(255).not_null())
                    .col(ColumnDef::new(PkiProfiles::Mail).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::Organisation).string_len(255).null())
                    .col(
                        ColumnDef::new(PkiProfiles::OrganisationalUnit)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PkiProfiles::Country).string_len(2).null())
                    .col(ColumnDef::new(PkiProfiles::State).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::Locality).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::StreetAddress).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::PostalCode).string_len(32).null())
                    .col(
                        ColumnDef::new(PkiProfiles::Validity)
                            .integer()
                            .not_null()
                            .default(365),
                    )
                    .col(ColumnDef::new(PkiProfiles::KeyType).string_len(16).not_null())
                    .col(ColumnDef::new(PkiProfiles::KeySize).integer().not_null())
                    .col(
                        ColumnDef::new(PkiProfiles::Digest)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PkiProfiles::KeyUsage).string_len(255).null())
                    .col(
                        ColumnDef::new(PkiProfiles::ExtendedKeyUsage)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PkiProfiles::OcspUrl).text().null())
                    .col(
                        ColumnDef::new(PkiProfiles::P12MailPassword)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(PkiProfiles::P12MailSubject).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::P12MailFrom).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::P12MailHeader).text().null())
                    .col(ColumnDef::new(PkiProfiles::P12MailFooter).text().null())
                    .col(
                        ColumnDef::new(PkiProfiles::ScepEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::ScepChallengePassword)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::ScepDaysBeforeRenewal)
                            .integer()
                            .not_null()
                            .default(14),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::DaysBeforeRenewal)
                            .integer()
                            .not_null()
                            .default(14),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::RenewalMail)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::DaysBeforeRenewalMail)
                            .integer()
                            .not_null()
                            .default(14),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::RenewalMailSubject)
                            .string_len(255)
                            .not_null()
                            .default("Certificate expiration"),
                    )
                    .col(ColumnDef::new(PkiProfiles::RenewalMailFrom).string_len(255).null())
                    .col(ColumnDef::new(PkiProfiles::RenewalMailHeader).text().null())
                    .col(ColumnDef::new(PkiProfiles::RenewalMailFooter).text().null())
                    .col(
                        ColumnDef::new(PkiProfiles::RevokedValidUntil)
                            .integer()
                            .not_null()
                            .default(14),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::CloudEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(PkiProfiles::CloudService).string_len(64).null())
                    .col(
                        ColumnDef::new(PkiProfiles::ScepServerEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::ScepServerId)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PkiProfiles::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_profiles_ca")
                            .from(PkiProfiles::Table, PkiProfiles::CaId)
                            .to(PkiCas::Table, PkiCas::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_profiles_scep_server")
                            .from(PkiProfiles::Table, PkiProfiles::ScepServerId)
                            .to(PkiScepServers::Table, PkiScepServers::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_profiles_name_unique")
                    .table(PkiProfiles::Table)
                    .col(PkiProfiles::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_profiles_ca_id")
                    .table(PkiProfiles::Table)
                    .col(PkiProfiles::CaId)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // PKI_CERTS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(PkiCerts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PkiCerts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PkiCerts::Cn).string_len(255).not_null())
                    .col(ColumnDef::new(PkiCerts::Mail).text().null())
                    .col(ColumnDef::new(PkiCerts::CaId).integer().not_null())
                    .col(ColumnDef::new(PkiCerts::CaName).string_len(255).not_null())
                    .col(ColumnDef::new(PkiCerts::StreetAddress).string_len(255).null())
                    .col(ColumnDef::new(PkiCerts::Organisation).string_len(255).null())
                    .col(
                        ColumnDef::new(PkiCerts::OrganisationalUnit)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PkiCerts::Country).string_len(2).null())
                    .col(ColumnDef::new(PkiCerts::State).string_len(255).null())
                    .col(ColumnDef::new(PkiCerts::Locality).string_len(255).null())
                    .col(ColumnDef::new(PkiCerts::PostalCode).string_len(32).null())
                    .col(ColumnDef::new(PkiCerts::Key).text().not_null().default(""))
                    .col(ColumnDef::new(PkiCerts::Cert).text().not_null())
                    .col(ColumnDef::new(PkiCerts::ProfileId).integer().not_null())
                    .col(ColumnDef::new(PkiCerts::ProfileName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(PkiCerts::ValidUntil)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiCerts::NotBefore)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiCerts::Date)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PkiCerts::SerialNumber).big_integer().not_null())
                    .col(ColumnDef::new(PkiCerts::DnsNames).text().null())
                    .col(ColumnDef::new(PkiCerts::IpAddresses).text().null())
                    .col(
                        ColumnDef::new(PkiCerts::Scep)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PkiCerts::Csr)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PkiCerts::Alert)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(PkiCerts::Subject).text().not_null())
                    .col(
                        ColumnDef::new(PkiCerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PkiCerts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_certs_ca")
                            .from(PkiCerts::Table, PkiCerts::CaId)
                            .to(PkiCas::Table, PkiCas::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_certs_profile")
                            .from(PkiCerts::Table, PkiCerts::ProfileId)
                            .to(PkiProfiles::Table, PkiProfiles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // One active certificate per subject DN
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_certs_subject_unique")
                    .table(PkiCerts::Table)
                    .col(PkiCerts::Subject)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_certs_ca_serial_unique")
                    .table(PkiCerts::Table)
                    .col(PkiCerts::CaId)
                    .col(PkiCerts::SerialNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_certs_cn_profile")
                    .table(PkiCerts::Table)
                    .col(PkiCerts::Cn)
                    .col(PkiCerts::ProfileId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_certs_valid_until")
                    .table(PkiCerts::Table)
                    .col(PkiCerts::ValidUntil)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // PKI_REVOKED_CERTS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(PkiRevokedCerts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PkiRevokedCerts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PkiRevokedCerts::Cn).string_len(255).not_null())
                    .col(ColumnDef::new(PkiRevokedCerts::Mail).text().null())
                    .col(ColumnDef::new(PkiRevokedCerts::CaId).integer().not_null())
                    .col(ColumnDef::new(PkiRevokedCerts::CaName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(PkiRevokedCerts::StreetAddress)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::Organisation)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::OrganisationalUnit)
                            .string_len(255)
                            .null(),
                    )
                    .col(ColumnDef::new(PkiRevokedCerts::Country).string_len(2).null())
                    .col(ColumnDef::new(PkiRevokedCerts::State).string_len(255).null())
                    .col(ColumnDef::new(PkiRevokedCerts::Locality).string_len(255).null())
                    .col(ColumnDef::new(PkiRevokedCerts::PostalCode).string_len(32).null())
                    .col(
                        ColumnDef::new(PkiRevokedCerts::Key)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(PkiRevokedCerts::Cert).text().not_null())
                    .col(ColumnDef::new(PkiRevokedCerts::ProfileId).integer().not_null())
                    .col(
                        ColumnDef::new(PkiRevokedCerts::ProfileName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::ValidUntil)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::NotBefore)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::Date)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::SerialNumber)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PkiRevokedCerts::DnsNames).text().null())
                    .col(ColumnDef::new(PkiRevokedCerts::IpAddresses).text().null())
                    .col(
                        ColumnDef::new(PkiRevokedCerts::Revoked)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PkiRevokedCerts::CrlReason)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PkiRevokedCerts::Subject).text().not_null())
                    .col(
                        ColumnDef::new(PkiRevokedCerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_revoked_certs_ca")
                            .from(PkiRevokedCerts::Table, PkiRevokedCerts::CaId)
                            .to(PkiCas::Table, PkiCas::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pki_revoked_certs_profile")
                            .from(PkiRevokedCerts::Table, PkiRevokedCerts::ProfileId)
                            .to(PkiProfiles::Table, PkiProfiles::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_revoked_certs_ca_serial")
                    .table(PkiRevokedCerts::Table)
                    .col(PkiRevokedCerts::CaId)
                    .col(PkiRevokedCerts::SerialNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pki_revoked_certs_profile")
                    .table(PkiRevokedCerts::Table)
                    .col(PkiRevokedCerts::ProfileId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PkiRevokedCerts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PkiCerts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PkiProfiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PkiCas::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PkiScepServers::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum PkiScepServers {
    Table,
    Id,
    Name,
    Url,
    SharedSecret,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PkiCas {
    Table,
    Id,
    Cn,
    Mail,
    Organisation,
    OrganisationalUnit,
    Country,
    State,
    Locality,
    StreetAddress,
    PostalCode,
    KeyType,
    KeySize,
    Digest,
    KeyUsage,
    ExtendedKeyUsage,
    Days,
    Key,
    Cert,
    IssuerKeyHash,
    IssuerNameHash,
    OcspUrl,
    SerialNumber,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PkiProfiles {
    Table,
    Id,
    Name,
    CaId,
    CaName,
    Mail,
    Organisation,
    OrganisationalUnit,
    Country,
    State,
    Locality,
    StreetAddress,
    PostalCode,
    Validity,
    KeyType,
    KeySize,
    Digest,
    KeyUsage,
    ExtendedKeyUsage,
    OcspUrl,
    P12MailPassword,
    P12MailSubject,
    P12MailFrom,
    P12MailHeader,
    P12MailFooter,
    ScepEnabled,
    ScepChallengePassword,
    ScepDaysBeforeRenewal,
    DaysBeforeRenewal,
    RenewalMail,
    DaysBeforeRenewalMail,
    RenewalMailSubject,
    RenewalMailFrom,
    RenewalMailHeader,
    RenewalMailFooter,
    RevokedValidUntil,
    CloudEnabled,
    CloudService,
    ScepServerEnabled,
    ScepServerId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PkiCerts {
    Table,
    Id,
    Cn,
    Mail,
    CaId,
    CaName,
    StreetAddress,
    Organisation,
    OrganisationalUnit,
    Country,
    State,
    Locality,
    PostalCode,
    Key,
    Cert,
    ProfileId,
    ProfileName,
    ValidUntil,
    NotBefore,
    Date,
    SerialNumber,
    DnsNames,
    IpAddresses,
    Scep,
    Csr,
    Alert,
    Subject,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PkiRevokedCerts {
    Table,
    Id,
    Cn,
    Mail,
    CaId,
    CaName,
    StreetAddress,
    Organisation,
    OrganisationalUnit,
    Country,
    State,
    Locality,
    PostalCode,
    Key,
    Cert,
    ProfileId,
    ProfileName,
    ValidUntil,
    NotBefore,
    Date,
    SerialNumber,
    DnsNames,
    IpAddresses,
    Revoked,
    CrlReason,
    Subject,
    CreatedAt,
}
