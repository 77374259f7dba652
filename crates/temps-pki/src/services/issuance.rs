//! Certificate issuance: the only place that allocates serials and signs leaves.

use chrono::{Duration, Utc};
use openssl::pkey::{PKey, Private, Public};
use openssl::x509::{X509Ref, X509};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::{pki_cas, pki_certs, pki_profiles};
use tracing::{debug, info};

use super::profile_service::find_profile;
use super::revocation::{ensure_replaceable, find_cert};
use crate::crypto::certificate::{
    self, carried_extensions, certificate_from_pem, certificate_to_pem, extensions_of,
    parse_ip_list, sign_certificate, CertificateTemplate, RawExtension, SubjectAltNames,
    OID_AUTHORITY_INFO_ACCESS, OID_EXT_KEY_USAGE, OID_KEY_USAGE,
};
use crate::crypto::keys::{
    backend_for_key, generate_key, private_key_from_pem, private_key_to_pem, public_only,
};
use crate::crypto::{
    ExtendedKeyUsages, KeyType, KeyUsageBits, ParsedCsr, SignatureAlgorithm, Subject,
    SubjectAttributes,
};
use crate::error::{PkiError, PkiResult};
use crate::locks::PkiLocks;
use crate::models::{join_list, split_list, CertRef, IssueRequest, ProfileRef};
use crate::serial;

/// A CA row with its key material decoded.
pub(crate) struct LoadedCa {
    pub model: pki_cas::Model,
    pub key: PKey<Private>,
    pub cert: X509,
}

impl LoadedCa {
    pub(crate) fn decode(model: pki_cas::Model) -> PkiResult<LoadedCa> {
        let key = private_key_from_pem(&model.key)?;
        let cert = certificate_from_pem(&model.cert)?;
        Ok(LoadedCa { model, key, cert })
    }
}

pub(crate) async fn load_ca<C: ConnectionTrait>(conn: &C, ca_id: i32) -> PkiResult<LoadedCa> {
    let model = pki_cas::Entity::find_by_id(ca_id)
        .one(conn)
        .await?
        .ok_or_else(|| PkiError::not_found("CA", ca_id))?;
    LoadedCa::decode(model)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Admin,
    Csr,
    Scep,
}

/// Everything needed to sign a leaf except the serial.
struct PendingCert<'a> {
    profile: &'a pki_profiles::Model,
    subject: Subject,
    public_key: PKey<Public>,
    alt_names: SubjectAltNames,
    requested_extensions: Vec<RawExtension>,
}

impl PendingCert<'_> {
    /// Allocates a serial on `conn` and signs with the profile's CA.
    async fn sign<C: ConnectionTrait>(&self, conn: &C) -> PkiResult<(X509, String)> {
        let profile = self.profile;
        let ca = load_ca(conn, profile.ca_id).await?;
        let algorithm = SignatureAlgorithm::from_code(profile.digest)?;
        let key_usage = KeyUsageBits::parse(profile.key_usage.as_deref())?;
        let extended_key_usage = ExtendedKeyUsages::parse(profile.extended_key_usage.as_deref())?;
        let ocsp_url = profile.ocsp_url.clone().filter(|url| !url.is_empty());

        let mut overridden = Vec::new();
        if !key_usage.is_empty() {
            overridden.push(OID_KEY_USAGE);
        }
        if !extended_key_usage.oids().is_empty() {
            overridden.push(OID_EXT_KEY_USAGE);
        }
        if ocsp_url.is_some() {
            overridden.push(OID_AUTHORITY_INFO_ACCESS);
        }

        let serial = serial::allocate(conn, ca.model.id).await?;
        let now = Utc::now();
        let template = CertificateTemplate {
            serial,
            subject: self.subject.to_x509_name()?,
            not_before: now,
            not_after: now + Duration::days(i64::from(profile.validity)),
            is_ca: false,
            key_usage,
            extended_key_usage,
            alt_names: self.alt_names.clone(),
            ocsp_url,
            extra_extensions: carried_extensions(&self.requested_extensions, &overridden),
        };
        let cert = sign_certificate(
            &template,
            &self.public_key,
            Some(&ca.cert),
            &ca.key,
            algorithm,
        )?;
        Ok((cert, ca.model.cn))
    }
}

/// Writes the fields derived from a signed certificate into `row`.
fn fill_row(
    row: &mut pki_certs::ActiveModel,
    subject: &Subject,
    alt_names: &SubjectAltNames,
    cert: &X509Ref,
    ca_name: String,
) -> PkiResult<()> {
    let attributes = subject.attributes.clone();
    row.cn = Set(subject.common_name.clone());
    row.subject = Set(subject.dn_string());
    row.organisation = Set(attributes.organisation);
    row.organisational_unit = Set(attributes.organisational_unit);
    row.country = Set(attributes.country);
    row.state = Set(attributes.state);
    row.locality = Set(attributes.locality);
    row.street_address = Set(attributes.street_address);
    row.postal_code = Set(attributes.postal_code);
    row.mail = Set(join_list(&alt_names.emails));
    row.dns_names = Set(join_list(&alt_names.dns));
    row.ip_addresses = Set(join_list(&alt_names.ip_strings()));
    row.ca_name = Set(ca_name);
    row.cert = Set(certificate_to_pem(cert)?);
    row.serial_number = Set(certificate::serial_number(cert)?);
    row.not_before = Set(certificate::not_before(cert)?);
    row.valid_until = Set(certificate::not_after(cert)?);
    row.date = Set(Utc::now());
    row.alert = Set(false);
    Ok(())
}

fn new_row(profile: &pki_profiles::Model, key_pem: String, origin: Origin) -> pki_certs::ActiveModel {
    pki_certs::ActiveModel {
        ca_id: Set(profile.ca_id),
        profile_id: Set(profile.id),
        profile_name: Set(profile.name.clone()),
        key: Set(key_pem),
        scep: Set(origin == Origin::Scep),
        csr: Set(origin == Origin::Csr),
        ..Default::default()
    }
}

fn stored_alt_names(cert: &pki_certs::Model) -> PkiResult<SubjectAltNames> {
    Ok(SubjectAltNames {
        dns: split_list(cert.dns_names.as_deref()),
        ips: parse_ip_list(&split_list(cert.ip_addresses.as_deref()))?,
        emails: split_list(cert.mail.as_deref()),
        uris: Vec::new(),
    })
}

pub struct IssuanceService {
    db: Arc<DbConnection>,
    locks: Arc<PkiLocks>,
}

impl IssuanceService {
    pub fn new(db: Arc<DbConnection>, locks: Arc<PkiLocks>) -> Self {
        Self { db, locks }
    }

    /// Issues a certificate with a freshly generated key under `profile`.
    pub async fn issue(
        &self,
        profile: impl Into<ProfileRef>,
        request: IssueRequest,
    ) -> PkiResult<pki_certs::Model> {
        let profile = find_profile(self.db.as_ref(), &profile.into()).await?;
        let key_type: KeyType = profile.key_type.parse()?;
        let subject = Subject::build(
            &request.cn,
            &request.subject,
            &SubjectAttributes::from(&profile),
        )?;

        let emails = match request.mail.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(mail) => split_list(Some(mail)),
            None => split_list(profile.mail.as_deref()),
        };
        let alt_names = SubjectAltNames {
            dns: request
                .dns_names
                .iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            ips: parse_ip_list(&request.ip_addresses)?,
            emails,
            uris: Vec::new(),
        };

        let key = generate_key(key_type, profile.key_size).await?;
        let pending = PendingCert {
            profile: &profile,
            subject,
            public_key: public_only(&key)?,
            alt_names,
            requested_extensions: Vec::new(),
        };
        self.store(
            pending,
            private_key_to_pem(&key)?,
            Origin::Admin,
            profile.days_before_renewal,
        )
        .await
    }

    /// Signs an uploaded CSR under `profile`. No private key is held.
    pub async fn sign_csr(
        &self,
        profile: impl Into<ProfileRef>,
        csr_pem: &str,
    ) -> PkiResult<pki_certs::Model> {
        let profile = find_profile(self.db.as_ref(), &profile.into()).await?;
        let csr = ParsedCsr::from_pem(csr_pem)?;
        self.issue_for_csr(&profile, &csr, Origin::Csr, profile.days_before_renewal)
            .await
    }

    /// Shared by CSR upload and SCEP enrollment.
    pub(crate) async fn issue_for_csr(
        &self,
        profile: &pki_profiles::Model,
        csr: &ParsedCsr,
        origin: Origin,
        allow_days: i32,
    ) -> PkiResult<pki_certs::Model> {
        let requested_type = backend_for_key(&csr.public_key)?.key_type();
        requested_type.validate_size(csr.public_key.bits() as i32)?;

        let subject = Subject::build(
            &csr.subject.common_name,
            &csr.subject.attributes,
            &SubjectAttributes::from(profile),
        )?;
        let mut alt_names = csr.alt_names.clone();
        let profile_mails = split_list(profile.mail.as_deref());
        if !profile_mails.is_empty() {
            alt_names.emails = profile_mails;
        }

        let pending = PendingCert {
            profile,
            subject,
            public_key: csr.public_key.clone(),
            alt_names,
            requested_extensions: csr.carried_extensions(&[]),
        };
        self.store(pending, String::new(), origin, allow_days).await
    }

    /// Renewal check, signing and insert as one critical section and transaction.
    async fn store(
        &self,
        pending: PendingCert<'_>,
        key_pem: String,
        origin: Origin,
        allow_days: i32,
    ) -> PkiResult<pki_certs::Model> {
        let profile = pending.profile;
        let _identity = self
            .locks
            .identity(&pending.subject.common_name, &profile.name)
            .await;
        let _ca = self.locks.ca(profile.ca_id).await;

        let txn = self.db.begin().await?;
        ensure_replaceable(&txn, &pending.subject.common_name, profile, allow_days).await?;
        let (cert, ca_name) = pending.sign(&txn).await?;

        let mut row = new_row(profile, key_pem, origin);
        fill_row(&mut row, &pending.subject, &pending.alt_names, &cert, ca_name)?;
        let stored = row.insert(&txn).await?;
        txn.commit().await?;

        info!(
            "Issued certificate {} for {} under profile {} (serial {}, CA {})",
            stored.id, stored.cn, stored.profile_name, stored.serial_number, stored.ca_name
        );
        Ok(stored)
    }

    /// Persists a certificate signed by a remote SCEP server.
    pub(crate) async fn store_remote(
        &self,
        profile: &pki_profiles::Model,
        cert: &X509Ref,
    ) -> PkiResult<pki_certs::Model> {
        let subject = Subject::from_x509_name(cert.subject_name())?;
        let alt_names = SubjectAltNames::from_certificate(cert);
        let _identity = self
            .locks
            .identity(&subject.common_name, &profile.name)
            .await;

        let txn = self.db.begin().await?;
        ensure_replaceable(
            &txn,
            &subject.common_name,
            profile,
            profile.scep_days_before_renewal,
        )
        .await?;
        let mut row = new_row(profile, String::new(), Origin::Scep);
        fill_row(&mut row, &subject, &alt_names, cert, profile.ca_name.clone())?;
        let stored = row.insert(&txn).await?;
        txn.commit().await?;

        info!(
            "Stored remotely signed certificate {} for {} under profile {}",
            stored.id, stored.cn, stored.profile_name
        );
        Ok(stored)
    }

    /// Re-signs an active certificate for its existing public key.
    pub async fn resign_cert(
        &self,
        id: i32,
        overrides: SubjectAttributes,
    ) -> PkiResult<pki_certs::Model> {
        let found = find_cert(self.db.as_ref(), &CertRef::Id(id)).await?;
        let _identity = self.locks.identity(&found.cn, &found.profile_name).await;
        let _ca = self.locks.ca(found.ca_id).await;

        let txn = self.db.begin().await?;
        let current = find_cert(&txn, &CertRef::Id(id)).await?;
        let profile = find_profile(&txn, &ProfileRef::Id(current.profile_id)).await?;
        let previous = certificate_from_pem(&current.cert)?;

        let pending = PendingCert {
            profile: &profile,
            subject: Subject::build(&current.cn, &overrides, &SubjectAttributes::from(&profile))?,
            public_key: previous.public_key()?,
            alt_names: stored_alt_names(&current)?,
            requested_extensions: extensions_of(&previous)?,
        };
        let (cert, ca_name) = pending.sign(&txn).await?;

        let mut row: pki_certs::ActiveModel = current.into();
        fill_row(&mut row, &pending.subject, &pending.alt_names, &cert, ca_name)?;
        let updated = row.update(&txn).await?;
        txn.commit().await?;

        info!(
            "Re-signed certificate {} for {} (serial {})",
            updated.id, updated.cn, updated.serial_number
        );
        Ok(updated)
    }

    pub async fn get_cert(&self, id: i32) -> PkiResult<pki_certs::Model> {
        find_cert(self.db.as_ref(), &CertRef::Id(id)).await
    }

    pub async fn get_cert_by_cn(
        &self,
        cn: &str,
        profile_name: Option<&str>,
    ) -> PkiResult<pki_certs::Model> {
        let mut query = pki_certs::Entity::find().filter(pki_certs::Column::Cn.eq(cn));
        if let Some(profile_name) = profile_name {
            query = query.filter(pki_certs::Column::ProfileName.eq(profile_name));
        }
        query
            .order_by_desc(pki_certs::Column::Id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("Certificate", cn))
    }

    pub async fn list_certs_for_profile(
        &self,
        profile_id: i32,
    ) -> PkiResult<Vec<pki_certs::Model>> {
        debug!("Listing certificates of profile {}", profile_id);
        Ok(pki_certs::Entity::find()
            .filter(pki_certs::Column::ProfileId.eq(profile_id))
            .order_by_asc(pki_certs::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}
