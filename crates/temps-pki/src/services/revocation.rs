//! Moves certificates from the active set into the revocation archive.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::{pki_certs, pki_profiles, pki_revoked_certs};
use tracing::{debug, info};

use crate::crypto::certificate::{certificate_from_pem, not_after};
use crate::error::{PkiError, PkiResult};
use crate::locks::PkiLocks;
use crate::models::{CertRef, RevocationReason};

pub(crate) async fn find_cert<C: ConnectionTrait>(
    conn: &C,
    cert: &CertRef,
) -> PkiResult<pki_certs::Model> {
    let found = match cert {
        CertRef::Id(id) => pki_certs::Entity::find_by_id(*id).one(conn).await?,
        CertRef::Identity { cn, profile_name } => {
            pki_certs::Entity::find()
                .filter(pki_certs::Column::Cn.eq(cn.as_str()))
                .filter(pki_certs::Column::ProfileName.eq(profile_name.as_str()))
                .order_by_desc(pki_certs::Column::Id)
                .one(conn)
                .await?
        }
    };
    found.ok_or_else(|| PkiError::not_found("Certificate", cert))
}

/// Archives `cert` and deletes the active row. Both writes share `conn`,
/// which should be a transaction.
pub(crate) async fn revoke_in<C: ConnectionTrait>(
    conn: &C,
    cert: pki_certs::Model,
    reason: RevocationReason,
    revoked_valid_until: i32,
) -> PkiResult<pki_revoked_certs::Model> {
    let now = Utc::now();
    let cert_id = cert.id;
    let archived = pki_revoked_certs::ActiveModel {
        cn: Set(cert.cn),
        mail: Set(cert.mail),
        ca_id: Set(cert.ca_id),
        ca_name: Set(cert.ca_name),
        street_address: Set(cert.street_address),
        organisation: Set(cert.organisation),
        organisational_unit: Set(cert.organisational_unit),
        country: Set(cert.country),
        state: Set(cert.state),
        locality: Set(cert.locality),
        postal_code: Set(cert.postal_code),
        key: Set(cert.key),
        cert: Set(cert.cert),
        profile_id: Set(cert.profile_id),
        profile_name: Set(cert.profile_name),
        valid_until: Set(cert.valid_until),
        not_before: Set(cert.not_before),
        date: Set(cert.date),
        serial_number: Set(cert.serial_number),
        dns_names: Set(cert.dns_names),
        ip_addresses: Set(cert.ip_addresses),
        revoked: Set(now + Duration::days(i64::from(revoked_valid_until))),
        crl_reason: Set(reason.code()),
        subject: Set(cert.subject),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let deleted = pki_certs::Entity::delete_by_id(cert_id).exec(conn).await?;
    if deleted.rows_affected == 0 {
        // revoked by someone else since it was read; the caller rolls back
        return Err(PkiError::not_found("Certificate", cert_id));
    }

    info!(
        "Revoked certificate {} (serial {}, CA {}) with reason {}",
        cert_id,
        archived.serial_number,
        archived.ca_name,
        archived.crl_reason
    );
    Ok(archived)
}

/// Clears the way for a new certificate for `(cn, profile)`.
///
/// An active certificate outside its renewal window is a conflict. One
/// inside it (or any when `allow_days` is 0) is revoked as superseded.
pub(crate) async fn ensure_replaceable<C: ConnectionTrait>(
    conn: &C,
    cn: &str,
    profile: &pki_profiles::Model,
    allow_days: i32,
) -> PkiResult<()> {
    let existing = pki_certs::Entity::find()
        .filter(pki_certs::Column::Cn.eq(cn))
        .filter(pki_certs::Column::ProfileName.eq(profile.name.as_str()))
        .all(conn)
        .await?;

    let now = Utc::now();
    for cert in &existing {
        let expires = not_after(&*certificate_from_pem(&cert.cert)?)?;
        if allow_days > 0 && expires - Duration::days(i64::from(allow_days)) > now {
            debug!(
                "Certificate {} for {} expires {}, outside the {} day renewal window",
                cert.id, cn, expires, allow_days
            );
            return Err(PkiError::Conflict(
                "certificate with this subject already exists".to_string(),
            ));
        }
    }

    for cert in existing {
        revoke_in(
            conn,
            cert,
            RevocationReason::Superseded,
            profile.revoked_valid_until,
        )
        .await?;
    }
    Ok(())
}

pub struct RevocationService {
    db: Arc<DbConnection>,
    locks: Arc<PkiLocks>,
}

impl RevocationService {
    pub fn new(db: Arc<DbConnection>, locks: Arc<PkiLocks>) -> Self {
        Self { db, locks }
    }

    /// Revokes an active certificate with a CRL reason code.
    pub async fn revoke(
        &self,
        cert: CertRef,
        reason_code: i32,
    ) -> PkiResult<pki_revoked_certs::Model> {
        let reason = RevocationReason::from_code(reason_code)?;
        let found = find_cert(self.db.as_ref(), &cert).await?;
        let _identity = self.locks.identity(&found.cn, &found.profile_name).await;

        let txn = self.db.begin().await?;
        // re-read under the identity lock
        let current = find_cert(&txn, &CertRef::Id(found.id)).await?;
        let profile = pki_profiles::Entity::find_by_id(current.profile_id)
            .one(&txn)
            .await?
            .ok_or_else(|| PkiError::not_found("Profile", current.profile_id))?;
        let archived = revoke_in(&txn, current, reason, profile.revoked_valid_until).await?;
        txn.commit().await?;
        Ok(archived)
    }

    pub async fn get_revoked_cert(&self, id: i32) -> PkiResult<pki_revoked_certs::Model> {
        pki_revoked_certs::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("Revoked certificate", id))
    }

    pub async fn list_revoked_for_profile(
        &self,
        profile_id: i32,
    ) -> PkiResult<Vec<pki_revoked_certs::Model>> {
        Ok(pki_revoked_certs::Entity::find()
            .filter(pki_revoked_certs::Column::ProfileId.eq(profile_id))
            .order_by_desc(pki_revoked_certs::Column::Revoked)
            .all(self.db.as_ref())
            .await?)
    }
}
