//! Issuance policies bound to a CA.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::{pki_cas, pki_profiles, pki_scep_servers};
use tracing::info;

use crate::crypto::certificate::validate_ocsp_url;
use crate::crypto::{ExtendedKeyUsages, KeyType, KeyUsageBits, SubjectAttributes};
use crate::error::{PkiError, PkiResult};
use crate::models::{NewProfile, ProfileRef, ProfileUpdate};

pub(crate) async fn find_profile<C: ConnectionTrait>(
    conn: &C,
    profile: &ProfileRef,
) -> PkiResult<pki_profiles::Model> {
    let found = match profile {
        ProfileRef::Id(id) => pki_profiles::Entity::find_by_id(*id).one(conn).await?,
        ProfileRef::Name(name) => {
            pki_profiles::Entity::find()
                .filter(pki_profiles::Column::Name.eq(name.as_str()))
                .one(conn)
                .await?
        }
    };
    found.ok_or_else(|| PkiError::not_found("Profile", profile))
}

/// SCEP profile by association name, else the first SCEP-enabled profile.
pub(crate) async fn find_scep_profile<C: ConnectionTrait>(
    conn: &C,
    name: Option<&str>,
) -> PkiResult<pki_profiles::Model> {
    let mut query = pki_profiles::Entity::find().filter(pki_profiles::Column::ScepEnabled.eq(true));
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        query = query.filter(pki_profiles::Column::Name.eq(name));
    }
    query
        .order_by_asc(pki_profiles::Column::Id)
        .one(conn)
        .await?
        .ok_or_else(|| PkiError::not_found("SCEP profile", name.unwrap_or("(default)")))
}

async fn ensure_scep_server<C: ConnectionTrait>(conn: &C, id: i32) -> PkiResult<()> {
    pki_scep_servers::Entity::find_by_id(id)
        .one(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| PkiError::not_found("SCEP server", id))
}

fn check_days(field: &str, days: i32, minimum: i32) -> PkiResult<()> {
    if days < minimum {
        return Err(PkiError::Validation(format!(
            "{} must be at least {}",
            field, minimum
        )));
    }
    Ok(())
}

fn check_cloud(enabled: bool, service: Option<&str>) -> PkiResult<()> {
    if enabled && service.map_or(true, |s| s.trim().is_empty()) {
        return Err(PkiError::validation(
            "cloud validation requires a cloud service name",
        ));
    }
    Ok(())
}

pub struct ProfileService {
    db: Arc<DbConnection>,
}

impl ProfileService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Validates everything before touching the database.
    pub async fn create_profile(&self, request: NewProfile) -> PkiResult<pki_profiles::Model> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(PkiError::validation("profile name is required"));
        }
        request.key_type.validate_size(request.key_size)?;
        KeyUsageBits::parse(request.key_usage.as_deref())?;
        ExtendedKeyUsages::parse(request.extended_key_usage.as_deref())?;
        request.subject.validate()?;
        check_days("validity", request.validity, 1)?;
        check_days("days_before_renewal", request.days_before_renewal, 0)?;
        check_days("scep_days_before_renewal", request.scep_days_before_renewal, 0)?;
        check_days("days_before_renewal_mail", request.days_before_renewal_mail, 0)?;
        check_days("revoked_valid_until", request.revoked_valid_until, 0)?;
        check_cloud(request.cloud_enabled, request.cloud_service.as_deref())?;
        if let Some(url) = request.ocsp_url.as_deref().filter(|u| !u.is_empty()) {
            validate_ocsp_url(url)?;
        }

        let ca = pki_cas::Entity::find_by_id(request.ca_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("CA", request.ca_id))?;
        let ca_key_type: KeyType = ca.key_type.parse()?;
        request.digest.check_key_type(ca_key_type)?;

        let scep_server_id = request
            .scep_server_id
            .unwrap_or(pki_scep_servers::DEFAULT_SCEP_SERVER_ID);
        ensure_scep_server(self.db.as_ref(), scep_server_id).await?;

        let subject = request.subject;
        let profile = pki_profiles::ActiveModel {
            name: Set(name),
            ca_id: Set(ca.id),
            ca_name: Set(ca.cn.clone()),
            mail: Set(request.mail),
            organisation: Set(subject.organisation),
            organisational_unit: Set(subject.organisational_unit),
            country: Set(subject.country),
            state: Set(subject.state),
            locality: Set(subject.locality),
            street_address: Set(subject.street_address),
            postal_code: Set(subject.postal_code),
            validity: Set(request.validity),
            key_type: Set(request.key_type.as_str().to_string()),
            key_size: Set(request.key_size),
            digest: Set(request.digest.code()),
            key_usage: Set(request.key_usage),
            extended_key_usage: Set(request.extended_key_usage),
            ocsp_url: Set(request.ocsp_url),
            p12_mail_password: Set(request.p12_mail_password),
            p12_mail_subject: Set(request.p12_mail_subject),
            p12_mail_from: Set(request.p12_mail_from),
            p12_mail_header: Set(request.p12_mail_header),
            p12_mail_footer: Set(request.p12_mail_footer),
            scep_enabled: Set(request.scep_enabled),
            scep_challenge_password: Set(request.scep_challenge_password),
            scep_days_before_renewal: Set(request.scep_days_before_renewal),
            days_before_renewal: Set(request.days_before_renewal),
            renewal_mail: Set(request.renewal_mail),
            days_before_renewal_mail: Set(request.days_before_renewal_mail),
            renewal_mail_subject: Set(request.renewal_mail_subject),
            renewal_mail_from: Set(request.renewal_mail_from),
            renewal_mail_header: Set(request.renewal_mail_header),
            renewal_mail_footer: Set(request.renewal_mail_footer),
            revoked_valid_until: Set(request.revoked_valid_until),
            cloud_enabled: Set(request.cloud_enabled),
            cloud_service: Set(request.cloud_service),
            scep_server_enabled: Set(request.scep_server_enabled),
            scep_server_id: Set(scep_server_id),
            ..Default::default()
        };
        let profile = profile.insert(self.db.as_ref()).await?;

        info!(
            "Created profile {} (id {}) under CA {}",
            profile.name, profile.id, profile.ca_name
        );
        Ok(profile)
    }

    /// Applies the whitelisted fields of `update`. CA binding, key
    /// parameters, digest and name stay as created.
    pub async fn update_profile(
        &self,
        profile: impl Into<ProfileRef>,
        update: ProfileUpdate,
    ) -> PkiResult<pki_profiles::Model> {
        let existing = find_profile(self.db.as_ref(), &profile.into()).await?;

        KeyUsageBits::parse(update.key_usage.as_deref())?;
        ExtendedKeyUsages::parse(update.extended_key_usage.as_deref())?;
        SubjectAttributes {
            country: update.country.clone(),
            ..Default::default()
        }
        .validate()?;
        if let Some(validity) = update.validity {
            check_days("validity", validity, 1)?;
        }
        if let Some(url) = update.ocsp_url.as_deref().filter(|u| !u.is_empty()) {
            validate_ocsp_url(url)?;
        }
        for (field, days) in [
            ("days_before_renewal", update.days_before_renewal),
            ("scep_days_before_renewal", update.scep_days_before_renewal),
            ("days_before_renewal_mail", update.days_before_renewal_mail),
            ("revoked_valid_until", update.revoked_valid_until),
        ] {
            if let Some(days) = days {
                check_days(field, days, 0)?;
            }
        }
        check_cloud(
            update.cloud_enabled.unwrap_or(existing.cloud_enabled),
            update
                .cloud_service
                .as_deref()
                .or(existing.cloud_service.as_deref()),
        )?;
        if let Some(id) = update.scep_server_id {
            ensure_scep_server(self.db.as_ref(), id).await?;
        }

        let mut active: pki_profiles::ActiveModel = existing.into();
        apply_update(&mut active, update);
        let updated = active.update(self.db.as_ref()).await?;

        info!("Updated profile {} (id {})", updated.name, updated.id);
        Ok(updated)
    }

    pub async fn get_profile(&self, id: i32) -> PkiResult<pki_profiles::Model> {
        find_profile(self.db.as_ref(), &ProfileRef::Id(id)).await
    }

    pub async fn get_profile_by_name(&self, name: &str) -> PkiResult<pki_profiles::Model> {
        find_profile(self.db.as_ref(), &ProfileRef::from(name)).await
    }

    pub async fn list_profiles(&self) -> PkiResult<Vec<pki_profiles::Model>> {
        Ok(pki_profiles::Entity::find()
            .order_by_asc(pki_profiles::Column::Name)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn find_scep_profile(&self, name: Option<&str>) -> PkiResult<pki_profiles::Model> {
        find_scep_profile(self.db.as_ref(), name).await
    }
}

fn apply_update(active: &mut pki_profiles::ActiveModel, update: ProfileUpdate) {
    macro_rules! set_some {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = update.$field {
                active.$field = Set(value);
            })*
        };
    }
    macro_rules! set_optional {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = update.$field {
                active.$field = Set(Some(value).filter(|v: &String| !v.is_empty()));
            })*
        };
    }

    set_optional!(
        mail,
        organisation,
        organisational_unit,
        country,
        state,
        locality,
        street_address,
        postal_code,
        key_usage,
        extended_key_usage,
        ocsp_url,
        p12_mail_subject,
        p12_mail_from,
        p12_mail_header,
        p12_mail_footer,
        scep_challenge_password,
        renewal_mail_from,
        renewal_mail_header,
        renewal_mail_footer,
        cloud_service,
    );
    set_some!(
        validity,
        p12_mail_password,
        scep_enabled,
        scep_days_before_renewal,
        days_before_renewal,
        renewal_mail,
        days_before_renewal_mail,
        renewal_mail_subject,
        revoked_valid_until,
        cloud_enabled,
        scep_server_enabled,
        scep_server_id,
    );
}
