//! Certificate authority registry.

use chrono::{Duration, Utc};
use openssl::pkey::{HasPublic, PKeyRef, Private};
use openssl::x509::X509;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::pki_cas;
use tracing::{info, warn};

use super::issuance::LoadedCa;
use crate::crypto::certificate::{
    certificate_from_pem, certificate_to_pem, issuer_hashes, sign_certificate,
    validate_ocsp_url, CertificateTemplate, SubjectAltNames,
};
use crate::crypto::csr::build_request;
use crate::crypto::keys::{generate_key, private_key_to_pem, same_public_key};
use crate::crypto::{
    ExtendedKeyUsages, KeyType, KeyUsageBits, SignatureAlgorithm, Subject, SubjectAttributes,
};
use crate::error::{PkiError, PkiResult};
use crate::locks::PkiLocks;
use crate::models::{split_list, NewCa};
use crate::serial::{self, CA_CERT_SERIAL, FIRST_LEAF_SERIAL};

/// Self-signs a CA certificate from the stored CA attributes.
fn self_sign<T: HasPublic>(
    ca: &pki_cas::Model,
    public_key: &PKeyRef<T>,
    key: &PKeyRef<Private>,
    serial: i64,
) -> PkiResult<X509> {
    let subject = Subject::build(
        &ca.cn,
        &SubjectAttributes::from(ca),
        &SubjectAttributes::default(),
    )?;
    let now = Utc::now();
    let template = CertificateTemplate {
        serial,
        subject: subject.to_x509_name()?,
        not_before: now,
        not_after: now + Duration::days(i64::from(ca.days)),
        is_ca: true,
        key_usage: KeyUsageBits::parse(ca.key_usage.as_deref())?.for_ca(),
        extended_key_usage: ExtendedKeyUsages::parse(ca.extended_key_usage.as_deref())?,
        alt_names: SubjectAltNames {
            emails: split_list(ca.mail.as_deref()),
            ..Default::default()
        },
        ocsp_url: ca.ocsp_url.clone().filter(|url| !url.is_empty()),
        extra_extensions: Vec::new(),
    };
    sign_certificate(
        &template,
        public_key,
        None,
        key,
        SignatureAlgorithm::from_code(ca.digest)?,
    )
}

fn set_certificate(active: &mut pki_cas::ActiveModel, cert: &X509) -> PkiResult<()> {
    let hashes = issuer_hashes(cert)?;
    active.cert = Set(certificate_to_pem(cert)?);
    active.issuer_key_hash = Set(hashes.key_hash);
    active.issuer_name_hash = Set(hashes.name_hash);
    Ok(())
}

pub struct CaService {
    db: Arc<DbConnection>,
    locks: Arc<PkiLocks>,
}

impl CaService {
    pub fn new(db: Arc<DbConnection>, locks: Arc<PkiLocks>) -> Self {
        Self { db, locks }
    }

    pub async fn create_ca(&self, request: NewCa) -> PkiResult<pki_cas::Model> {
        let cn = request.cn.trim().to_string();
        if cn.is_empty() {
            return Err(PkiError::validation("CA common name is required"));
        }
        request.key_type.validate_size(request.key_size)?;
        request.digest.check_key_type(request.key_type)?;
        KeyUsageBits::parse(request.key_usage.as_deref())?;
        ExtendedKeyUsages::parse(request.extended_key_usage.as_deref())?;
        request.subject.validate()?;
        if request.days < 1 {
            return Err(PkiError::validation("CA validity must be at least one day"));
        }
        if let Some(url) = request.ocsp_url.as_deref().filter(|u| !u.is_empty()) {
            validate_ocsp_url(url)?;
        }

        let existing = pki_cas::Entity::find()
            .filter(pki_cas::Column::Cn.eq(cn.as_str()))
            .one(self.db.as_ref())
            .await?;
        if existing.is_some() {
            return Err(PkiError::Conflict(format!("CA {} already exists", cn)));
        }

        let key = generate_key(request.key_type, request.key_size).await?;
        let subject = request.subject;
        let mut ca = pki_cas::Model {
            id: 0,
            cn,
            mail: request.mail,
            organisation: subject.organisation,
            organisational_unit: subject.organisational_unit,
            country: subject.country,
            state: subject.state,
            locality: subject.locality,
            street_address: subject.street_address,
            postal_code: subject.postal_code,
            key_type: request.key_type.as_str().to_string(),
            key_size: request.key_size,
            digest: request.digest.code(),
            key_usage: request.key_usage,
            extended_key_usage: request.extended_key_usage,
            days: request.days,
            key: private_key_to_pem(&key)?,
            cert: String::new(),
            issuer_key_hash: String::new(),
            issuer_name_hash: String::new(),
            ocsp_url: request.ocsp_url,
            // The self-signed certificate takes serial 1 of the CA's own counter.
            serial_number: FIRST_LEAF_SERIAL,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let cert = self_sign(&ca, &key, &key, CA_CERT_SERIAL)?;
        let hashes = issuer_hashes(&cert)?;
        ca.cert = certificate_to_pem(&cert)?;
        ca.issuer_key_hash = hashes.key_hash;
        ca.issuer_name_hash = hashes.name_hash;

        let mut active: pki_cas::ActiveModel = ca.into();
        active.id = Default::default();
        active.created_at = Default::default();
        active.updated_at = Default::default();
        let ca = active.insert(self.db.as_ref()).await?;

        info!(
            "Created CA {} (id {}, {} {})",
            ca.cn, ca.id, ca.key_type, ca.key_size
        );
        Ok(ca)
    }

    pub async fn get_ca(&self, id: i32) -> PkiResult<pki_cas::Model> {
        pki_cas::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("CA", id))
    }

    pub async fn get_ca_by_cn(&self, cn: &str) -> PkiResult<pki_cas::Model> {
        pki_cas::Entity::find()
            .filter(pki_cas::Column::Cn.eq(cn))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("CA", cn))
    }

    pub async fn list_cas(&self) -> PkiResult<Vec<pki_cas::Model>> {
        Ok(pki_cas::Entity::find()
            .order_by_asc(pki_cas::Column::Cn)
            .all(self.db.as_ref())
            .await?)
    }

    /// New self-signed certificate for the existing key.
    pub async fn resign_ca(&self, id: i32) -> PkiResult<pki_cas::Model> {
        let _ca = self.locks.ca(id).await;
        let txn = self.db.begin().await?;
        let serial = serial::allocate(&txn, id).await?;
        let loaded = super::issuance::load_ca(&txn, id).await?;

        let cert = self_sign(&loaded.model, &loaded.key, &loaded.key, serial)?;
        let mut active: pki_cas::ActiveModel = loaded.model.into();
        set_certificate(&mut active, &cert)?;
        let ca = active.update(&txn).await?;
        txn.commit().await?;

        info!("Re-signed CA {} (id {}) with serial {}", ca.cn, ca.id, serial);
        Ok(ca)
    }

    /// Replaces key and certificate. Certificates issued under the old key
    /// no longer chain to this CA.
    pub async fn rekey_ca(&self, id: i32) -> PkiResult<pki_cas::Model> {
        let current = self.get_ca(id).await?;
        let key_type: KeyType = current.key_type.parse()?;
        let key = generate_key(key_type, current.key_size).await?;

        let _ca = self.locks.ca(id).await;
        let txn = self.db.begin().await?;
        let serial = serial::allocate(&txn, id).await?;
        let loaded = super::issuance::load_ca(&txn, id).await?;

        let cert = self_sign(&loaded.model, &key, &key, serial)?;
        let mut active: pki_cas::ActiveModel = loaded.model.into();
        active.key = Set(private_key_to_pem(&key)?);
        set_certificate(&mut active, &cert)?;
        let ca = active.update(&txn).await?;
        txn.commit().await?;

        warn!(
            "Re-keyed CA {} (id {}); certificates issued before no longer chain to it",
            ca.cn, ca.id
        );
        Ok(ca)
    }

    /// PKCS#10 request for the CA's current key, PEM encoded.
    pub async fn generate_csr(&self, id: i32) -> PkiResult<String> {
        let loaded = LoadedCa::decode(self.get_ca(id).await?)?;
        let subject = Subject::from_x509_name(loaded.cert.subject_name())?;
        let request = build_request(
            &subject.to_x509_name()?,
            &loaded.key,
            SignatureAlgorithm::from_code(loaded.model.digest)?,
        )?;
        String::from_utf8(request.to_pem()?).map_err(|e| PkiError::Crypto(e.to_string()))
    }

    /// Installs a certificate an upstream authority issued for this CA's key.
    pub async fn update_ca_cert(&self, id: i32, cert_pem: &str) -> PkiResult<pki_cas::Model> {
        let cert = certificate_from_pem(cert_pem)
            .map_err(|e| PkiError::Validation(format!("invalid certificate: {}", e)))?;

        let _ca = self.locks.ca(id).await;
        let loaded = LoadedCa::decode(self.get_ca(id).await?)?;
        if !same_public_key(&*cert.public_key()?, &loaded.key)? {
            return Err(PkiError::validation(
                "certificate does not match the CA private key",
            ));
        }

        let mut active: pki_cas::ActiveModel = loaded.model.into();
        set_certificate(&mut active, &cert)?;
        let ca = active.update(self.db.as_ref()).await?;

        info!("Installed new certificate for CA {} (id {})", ca.cn, ca.id);
        Ok(ca)
    }

    /// Recomputes missing issuer hashes; returns the number of CAs repaired.
    pub async fn fix_issuer_hashes(&self) -> PkiResult<usize> {
        let broken = pki_cas::Entity::find()
            .filter(
                Condition::any()
                    .add(pki_cas::Column::IssuerKeyHash.eq(""))
                    .add(pki_cas::Column::IssuerNameHash.eq("")),
            )
            .all(self.db.as_ref())
            .await?;

        let mut repaired = 0;
        for ca in broken {
            let _ca = self.locks.ca(ca.id).await;
            let cert = certificate_from_pem(&ca.cert)?;
            let cn = ca.cn.clone();
            let mut active: pki_cas::ActiveModel = ca.into();
            set_certificate(&mut active, &cert)?;
            active.update(self.db.as_ref()).await?;
            info!("Recomputed issuer hashes of CA {}", cn);
            repaired += 1;
        }
        Ok(repaired)
    }
}
