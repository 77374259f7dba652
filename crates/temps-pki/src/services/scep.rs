//! SCEP enrollment: profile resolution, challenge and external validation
//! in front of the issuance engine.

use async_trait::async_trait;
use openssl::x509::{X509Ref, X509};
use sea_orm::EntityTrait;
use std::collections::HashMap;
use std::sync::Arc;
use temps_database::DbConnection;
use temps_entities::{pki_certs, pki_profiles, pki_scep_servers};
use tracing::{info, warn};

use super::issuance::{load_ca, IssuanceService, Origin};
use super::profile_service::find_scep_profile;
use crate::crypto::ParsedCsr;
use crate::error::{PkiError, PkiResult};
use crate::models::ScepRequest;

/// External compliance check consulted before a SCEP certificate is issued.
#[async_trait]
pub trait CloudValidator: Send + Sync {
    async fn validate_request(&self, csr_der: &[u8]) -> anyhow::Result<()>;

    async fn failure_reply(
        &self,
        cert: Option<&X509Ref>,
        csr_der: &[u8],
        message: &str,
    ) -> anyhow::Result<()>;

    async fn success_reply(&self, cert: &X509Ref, csr_der: &[u8], message: &str)
        -> anyhow::Result<()>;
}

/// Validators by `cloud_service` name.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn CloudValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: impl Into<String>, validator: Arc<dyn CloudValidator>) {
        self.validators.insert(service.into(), validator);
    }

    pub fn get(&self, service: &str) -> Option<Arc<dyn CloudValidator>> {
        self.validators.get(service).cloned()
    }
}

/// Forwards a request to a remote SCEP server and returns the DER certificate.
#[async_trait]
pub trait RemoteEnrollment: Send + Sync {
    async fn enroll(
        &self,
        server: &pki_scep_servers::Model,
        request: &ScepRequest,
    ) -> anyhow::Result<Vec<u8>>;
}

fn challenge_matches(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && openssl::memcmp::eq(expected.as_bytes(), provided.as_bytes())
}

pub struct ScepResponder {
    db: Arc<DbConnection>,
    issuance: Arc<IssuanceService>,
    validators: ValidatorRegistry,
    remote: Option<Arc<dyn RemoteEnrollment>>,
    profile_name: Option<String>,
}

impl ScepResponder {
    pub fn new(db: Arc<DbConnection>, issuance: Arc<IssuanceService>) -> Self {
        Self {
            db,
            issuance,
            validators: ValidatorRegistry::default(),
            remote: None,
            profile_name: None,
        }
    }

    /// Binds the responder to a profile by name.
    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_remote_enrollment(mut self, remote: Arc<dyn RemoteEnrollment>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub async fn profile(&self) -> PkiResult<pki_profiles::Model> {
        find_scep_profile(self.db.as_ref(), self.profile_name.as_deref()).await
    }

    /// CA chain returned for GetCACert.
    pub async fn ca_certs(&self) -> PkiResult<Vec<X509>> {
        let profile = self.profile().await?;
        let ca = load_ca(self.db.as_ref(), profile.ca_id).await?;
        Ok(vec![ca.cert])
    }

    pub async fn handle_enrollment(&self, request: ScepRequest) -> PkiResult<pki_certs::Model> {
        let profile = self.profile().await?;
        let validator = match profile.cloud_service.as_deref() {
            Some(service) if profile.cloud_enabled => Some(self.validators.get(service).ok_or_else(
                || {
                    PkiError::Configuration(format!(
                        "cloud service {} is not registered",
                        service
                    ))
                },
            )?),
            _ if profile.cloud_enabled => {
                return Err(PkiError::Configuration(
                    "cloud validation enabled without a service".to_string(),
                ))
            }
            _ => None,
        };

        match self.enroll(&profile, validator.as_deref(), &request).await {
            Ok((cert, stored)) => {
                info!(
                    "SCEP enrollment for {} under profile {} succeeded (serial {})",
                    stored.cn, profile.name, stored.serial_number
                );
                if let Some(validator) = &validator {
                    if let Err(e) = validator
                        .success_reply(&cert, &request.csr_der, "certificate issued")
                        .await
                    {
                        warn!("Cloud success reply for {} failed: {}", stored.cn, e);
                    }
                }
                Ok(stored)
            }
            Err(err) => {
                warn!(
                    "SCEP enrollment under profile {} failed: {}",
                    profile.name, err
                );
                if let Some(validator) = &validator {
                    if let Err(e) = validator
                        .failure_reply(None, &request.csr_der, &err.to_string())
                        .await
                    {
                        warn!("Cloud failure reply failed: {}", e);
                    }
                }
                Err(err)
            }
        }
    }

    async fn enroll(
        &self,
        profile: &pki_profiles::Model,
        validator: Option<&dyn CloudValidator>,
        request: &ScepRequest,
    ) -> PkiResult<(X509, pki_certs::Model)> {
        let parsed = ParsedCsr::from_der(&request.csr_der);

        if let Some(expected) = profile
            .scep_challenge_password
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            let provided = request.challenge_password.clone().or_else(|| {
                parsed
                    .as_ref()
                    .ok()
                    .and_then(|csr| csr.challenge_password.clone())
            });
            if !provided.is_some_and(|p| challenge_matches(expected, &p)) {
                return Err(PkiError::ScepRejected(
                    "challenge password mismatch".to_string(),
                ));
            }
        }

        if let Some(validator) = validator {
            validator
                .validate_request(&request.csr_der)
                .await
                .map_err(|e| PkiError::ScepRejected(e.to_string()))?;
        }

        let csr = parsed?;
        if profile.scep_server_enabled {
            return self.enroll_remote(profile, request).await;
        }

        let stored = self
            .issuance
            .issue_for_csr(
                profile,
                &csr,
                Origin::Scep,
                profile.scep_days_before_renewal,
            )
            .await?;
        let cert = X509::from_pem(stored.cert.as_bytes())?;
        Ok((cert, stored))
    }

    async fn enroll_remote(
        &self,
        profile: &pki_profiles::Model,
        request: &ScepRequest,
    ) -> PkiResult<(X509, pki_certs::Model)> {
        let remote = self.remote.as_ref().ok_or_else(|| {
            PkiError::Configuration(format!(
                "profile {} delegates to a SCEP server but no remote enrollment is configured",
                profile.name
            ))
        })?;
        let server = pki_scep_servers::Entity::find_by_id(profile.scep_server_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("SCEP server", profile.scep_server_id))?;
        if server.url.trim().is_empty() {
            return Err(PkiError::Configuration(format!(
                "SCEP server {} has no URL",
                server.name
            )));
        }

        let der = remote.enroll(&server, request).await.map_err(|e| {
            PkiError::ScepRejected(format!("remote SCEP server {}: {}", server.name, e))
        })?;
        let cert = X509::from_der(&der)?;
        let stored = self.issuance.store_remote(profile, &cert).await?;
        Ok((cert, stored))
    }
}
