//! Engine behaviour against an in-memory database.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use std::sync::Arc;
use temps_entities::{pki_cas, pki_certs, pki_profiles, pki_revoked_certs, pki_scep_servers};

use crate::crypto::certificate::{
    certificate_from_pem, issuer_hashes, serial_number, sign_certificate, CertificateTemplate,
};
use crate::crypto::keys::{generate_key, key_id, private_key_from_pem, same_public_key};
use crate::crypto::{
    ExtendedKeyUsages, KeyType, KeyUsageBits, ParsedCsr, SignatureAlgorithm, Subject,
    SubjectAttributes,
};
use crate::error::PkiError;
use crate::models::{
    CertRef, IssueRequest, NewCa, NewProfile, Pkcs12Delivery, ProfileUpdate, RevocationReason,
    ScepRequest,
};
use crate::config::PkiConfig;
use crate::services::{
    NewScepServer, PkiServices, RemoteEnrollment, RenewalScheduler, ScepServerUpdate,
    ValidatorRegistry,
};
use crate::test_utils::{device_csr, Fixture, RecordingNotifier, RecordingValidator};

async fn cert_count(fx: &Fixture) -> u64 {
    pki_certs::Entity::find()
        .count(fx.database.connection())
        .await
        .unwrap()
}

async fn revoked_count(fx: &Fixture) -> u64 {
    pki_revoked_certs::Entity::find()
        .count(fx.database.connection())
        .await
        .unwrap()
}

async fn expire(fx: &Fixture, cert: &pki_certs::Model, valid_until: chrono::DateTime<Utc>) {
    let mut active: pki_certs::ActiveModel = cert.clone().into();
    active.valid_until = Set(valid_until);
    active.update(fx.database.connection()).await.unwrap();
}

#[tokio::test]
async fn test_profile_rejects_key_size_for_type() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;

    for (key_type, bits) in [
        (KeyType::Rsa, 1024),
        (KeyType::Rsa, 2047),
        (KeyType::Ecdsa, 224),
        (KeyType::Ecdsa, 2048),
        (KeyType::Dsa, 512),
        (KeyType::Dsa, 4096),
    ] {
        let mut request = NewProfile::new(format!("{}-{}", key_type, bits), ca.id);
        request.key_type = key_type;
        request.key_size = bits;
        let err = fx.services.profiles.create_profile(request).await.unwrap_err();
        assert!(
            matches!(err, PkiError::Validation(_)),
            "{} {} should be rejected, got {:?}",
            key_type,
            bits,
            err
        );
    }

    let profiles = pki_profiles::Entity::find()
        .count(fx.database.connection())
        .await
        .unwrap();
    assert_eq!(profiles, 0);
}

#[tokio::test]
async fn test_profile_rejects_malformed_ocsp_url() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;

    let mut request = NewProfile::new("ocsp", ca.id);
    request.ocsp_url = Some("http://ocsp.example.com/a,DNS:evil".to_string());
    let err = fx.services.profiles.create_profile(request).await.unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));

    let profile = fx.profile("ocsp", &ca, |_| {}).await;
    let err = fx
        .services
        .profiles
        .update_profile(
            profile.id,
            ProfileUpdate {
                ocsp_url: Some("ldap://directory".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));
}

#[tokio::test]
async fn test_profile_requires_existing_ca_and_scep_server() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;

    let mut request = NewProfile::new("orphan", ca.id + 100);
    request.digest = SignatureAlgorithm::Sha256WithRsa;
    let err = fx.services.profiles.create_profile(request).await.unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));

    let mut request = NewProfile::new("no-server", ca.id);
    request.key_type = KeyType::Ecdsa;
    request.key_size = 256;
    request.scep_server_id = Some(42);
    let err = fx.services.profiles.create_profile(request).await.unwrap_err();
    assert!(matches!(err, PkiError::NotFound { .. }));

    // RSA digest against the ECDSA CA
    let mut request = NewProfile::new("wrong-digest", ca.id);
    request.digest = SignatureAlgorithm::Sha256WithRsa;
    let err = fx.services.profiles.create_profile(request).await.unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));

    let profile = fx.profile("default", &ca, |_| {}).await;
    assert_eq!(profile.scep_server_id, pki_scep_servers::DEFAULT_SCEP_SERVER_ID);
    assert_eq!(profile.ca_name, "Test CA");
}

#[tokio::test]
async fn test_profile_update_is_whitelisted() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let profile = fx.profile("default", &ca, |_| {}).await;

    let updated = fx
        .services
        .profiles
        .update_profile(
            "default",
            ProfileUpdate {
                validity: Some(30),
                mail: Some("ops@example.com".to_string()),
                renewal_mail: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.validity, 30);
    assert_eq!(updated.mail.as_deref(), Some("ops@example.com"));
    assert!(!updated.renewal_mail);
    assert_eq!(updated.ca_id, profile.ca_id);
    assert_eq!(updated.key_type, profile.key_type);
    assert_eq!(updated.organisation, profile.organisation);

    let err = fx
        .services
        .profiles
        .update_profile(
            profile.id,
            ProfileUpdate {
                validity: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));
}

#[tokio::test]
async fn test_issued_certificate_chains_to_ca() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let profile = fx
        .profile("default", &ca, |p| p.mail = Some("fallback@example.com".to_string()))
        .await;

    let cert = fx
        .services
        .issuance
        .issue(
            profile.id,
            IssueRequest {
                dns_names: vec!["host.example.com".to_string()],
                ip_addresses: vec!["10.0.0.5".to_string()],
                subject: SubjectAttributes {
                    organisation: Some("Acme, Inc".to_string()),
                    ..Default::default()
                },
                ..IssueRequest::new("host.example.com")
            },
        )
        .await
        .unwrap();

    assert_eq!(cert.serial_number, 2);
    assert_eq!(cert.subject, "CN=host.example.com,L=Montreal,O=Acme\\, Inc,C=CA");
    assert_eq!(cert.mail.as_deref(), Some("fallback@example.com"));
    assert_eq!(cert.dns_names.as_deref(), Some("host.example.com"));
    assert_eq!(cert.ip_addresses.as_deref(), Some("10.0.0.5"));
    assert!(!cert.scep && !cert.csr && !cert.alert);

    let leaf = certificate_from_pem(&cert.cert).unwrap();
    let ca_cert = certificate_from_pem(&ca.cert).unwrap();
    assert!(leaf.verify(&ca_cert.public_key().unwrap()).unwrap());
    assert_eq!(
        leaf.authority_key_id().unwrap().as_slice(),
        ca_cert.subject_key_id().unwrap().as_slice()
    );
    let key = private_key_from_pem(&cert.key).unwrap();
    assert_eq!(
        leaf.subject_key_id().unwrap().as_slice(),
        key_id(&key).unwrap().as_slice()
    );
    assert!((cert.valid_until - cert.not_before - Duration::days(365)).num_seconds().abs() < 2);
}

#[tokio::test]
async fn test_leaf_serial_never_reuses_the_ca_certificate_serial() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;
    assert_eq!(ca.serial_number, 2);

    let ca_cert = certificate_from_pem(&ca.cert).unwrap();
    assert_eq!(serial_number(&ca_cert).unwrap(), 1);

    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();
    let leaf = certificate_from_pem(&cert.cert).unwrap();
    assert_eq!(
        leaf.issuer_name().to_der().unwrap(),
        ca_cert.subject_name().to_der().unwrap()
    );
    assert_ne!(serial_number(&leaf).unwrap(), serial_number(&ca_cert).unwrap());

    let resigned = fx.services.cas.resign_ca(ca.id).await.unwrap();
    let resigned_cert = certificate_from_pem(&resigned.cert).unwrap();
    assert_ne!(serial_number(&resigned_cert).unwrap(), cert.serial_number);
}

#[tokio::test]
async fn test_invalid_ip_is_rejected_before_persistence() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;

    let err = fx
        .services
        .issuance
        .issue(
            "default",
            IssueRequest {
                ip_addresses: vec!["10.0.0.300".to_string()],
                ..IssueRequest::new("host.example.com")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));
    assert_eq!(cert_count(&fx).await, 0);
}

#[tokio::test]
async fn test_duplicate_subject_conflict_hides_schema() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("web", &ca, |_| {}).await;
    fx.profile("vpn", &ca, |_| {}).await;

    fx.services
        .issuance
        .issue("web", IssueRequest::new("host.example.com"))
        .await
        .unwrap();
    let err = fx
        .services
        .issuance
        .issue("vpn", IssueRequest::new("host.example.com"))
        .await
        .unwrap_err();

    match err {
        PkiError::Conflict(message) => {
            assert_eq!(message, "certificate with this subject already exists");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(cert_count(&fx).await, 1);
}

#[tokio::test]
async fn test_concurrent_issuance_gets_distinct_serials() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let issuance = fx.services.issuance.clone();
        handles.push(tokio::spawn(async move {
            issuance
                .issue("default", IssueRequest::new(format!("host-{}.example.com", i)))
                .await
        }));
    }
    let mut serials = Vec::new();
    for handle in handles {
        serials.push(handle.await.unwrap().unwrap().serial_number);
    }
    serials.sort_unstable();
    assert_eq!(serials, (2..=9).collect::<Vec<i64>>());

    let stored = fx.services.cas.get_ca(ca.id).await.unwrap();
    assert_eq!(stored.serial_number, 10);
}

#[tokio::test]
async fn test_serials_stay_distinct_across_engines_on_postgres() {
    let Some(fx) = Fixture::postgres().await else {
        return;
    };
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;

    // A second engine over the same database shares none of the first one's locks.
    let other = PkiServices::new(fx.database.connection_arc(), PkiConfig::default());

    let mut handles = Vec::new();
    for i in 0..12 {
        let issuance = if i % 2 == 0 {
            fx.services.issuance.clone()
        } else {
            other.issuance.clone()
        };
        handles.push(tokio::spawn(async move {
            issuance
                .issue("default", IssueRequest::new(format!("host-{}.example.com", i)))
                .await
        }));
    }
    let mut serials = Vec::new();
    for handle in handles {
        serials.push(handle.await.unwrap().unwrap().serial_number);
    }
    serials.sort_unstable();
    assert_eq!(serials, (2..=13).collect::<Vec<i64>>());

    let stored = fx.services.cas.get_ca(ca.id).await.unwrap();
    assert_eq!(stored.serial_number, 14);
}

#[tokio::test]
async fn test_revoke_archives_and_removes() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let profile = fx.profile("default", &ca, |p| p.revoked_valid_until = 7).await;
    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();

    let err = fx
        .services
        .revocation
        .revoke(CertRef::Id(cert.id), 7)
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));
    assert_eq!(cert_count(&fx).await, 1);

    let revoked = fx
        .services
        .revocation
        .revoke(CertRef::identity("host.example.com", "default"), 1)
        .await
        .unwrap();
    assert_eq!(revoked.crl_reason, RevocationReason::KeyCompromise.code());
    assert_eq!(revoked.serial_number, cert.serial_number);
    assert_eq!(revoked.subject, cert.subject);
    assert!(revoked.revoked > Utc::now() + Duration::days(6));

    assert!(matches!(
        fx.services.issuance.get_cert(cert.id).await.unwrap_err(),
        PkiError::NotFound { .. }
    ));
    assert_eq!(revoked_count(&fx).await, 1);
    let archived = fx
        .services
        .revocation
        .list_revoked_for_profile(profile.id)
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(
        fx.services.revocation.get_revoked_cert(revoked.id).await.unwrap().cn,
        "host.example.com"
    );

    let again = fx.services.revocation.revoke(CertRef::Id(cert.id), 1).await;
    assert!(matches!(again, Err(PkiError::NotFound { .. })));
    assert_eq!(revoked_count(&fx).await, 1);
}

#[tokio::test]
async fn test_reissue_outside_renewal_window_conflicts() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;

    let first = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();
    let err = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Conflict(_)));

    let still = fx.services.issuance.get_cert(first.id).await.unwrap();
    assert_eq!(still.serial_number, first.serial_number);
    assert_eq!(still.cert, first.cert);
    assert_eq!(cert_count(&fx).await, 1);
    assert_eq!(revoked_count(&fx).await, 0);
}

#[tokio::test]
async fn test_reissue_inside_renewal_window_supersedes() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |p| {
        p.validity = 10;
        p.days_before_renewal = 14;
    })
    .await;

    let first = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();
    let second = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert!(second.serial_number > first.serial_number);
    assert_eq!(cert_count(&fx).await, 1);

    let revoked = pki_revoked_certs::Entity::find()
        .all(fx.database.connection())
        .await
        .unwrap();
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].serial_number, first.serial_number);
    assert_eq!(revoked[0].crl_reason, RevocationReason::Superseded.code());
}

#[tokio::test]
async fn test_renewal_sweep_is_idempotent() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("short", &ca, |p| {
        p.validity = 10;
        p.days_before_renewal_mail = 14;
    })
    .await;
    fx.profile("long", &ca, |_| {}).await;

    let issuance = &fx.services.issuance;
    let expired = issuance
        .issue("long", IssueRequest::new("expired.example.com"))
        .await
        .unwrap();
    let due = issuance
        .issue("short", IssueRequest::new("due.example.com"))
        .await
        .unwrap();
    let fresh = issuance
        .issue("long", IssueRequest::new("fresh.example.com"))
        .await
        .unwrap();
    expire(&fx, &expired, Utc::now() - Duration::days(1)).await;

    let first = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(first.revoked, 1);
    assert_eq!(first.notified, 1);
    assert_eq!(first.failed, 0);

    let second = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(second.revoked, 0);
    assert_eq!(second.notified, 0);

    assert_eq!(fx.notifier.count().await, 1);
    let sent = fx.notifier.sent.lock().await;
    assert_eq!(sent[0].to, vec!["pki-alerts@example.com".to_string()]);
    assert_eq!(sent[0].subject, "Certificate expiration");
    drop(sent);

    assert!(fx.services.issuance.get_cert(due.id).await.unwrap().alert);
    assert!(!fx.services.issuance.get_cert(fresh.id).await.unwrap().alert);
    assert!(fx.services.issuance.get_cert(expired.id).await.is_err());
    assert_eq!(revoked_count(&fx).await, 1);
}

#[tokio::test]
async fn test_expired_certificate_is_revoked_after_its_reminder() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("short", &ca, |p| p.validity = 5).await;
    let cert = fx
        .services
        .issuance
        .issue("short", IssueRequest::new("due.example.com"))
        .await
        .unwrap();

    let first = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(first.notified, 1);
    let alerted = fx.services.issuance.get_cert(cert.id).await.unwrap();
    assert!(alerted.alert);

    expire(&fx, &alerted, Utc::now() - Duration::hours(1)).await;
    let second = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(second.revoked, 1);
    assert_eq!(second.notified, 0);
    assert!(fx.services.issuance.get_cert(cert.id).await.is_err());
    assert_eq!(revoked_count(&fx).await, 1);

    let third = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(third.revoked, 0);
    assert_eq!(fx.notifier.count().await, 1);
}

#[tokio::test]
async fn test_failed_reminder_is_retried() {
    let fx = Fixture::with_notifier(RecordingNotifier::failing()).await;
    let ca = fx.ca("Test CA").await;
    fx.profile("short", &ca, |p| p.validity = 5).await;
    let due = fx
        .services
        .issuance
        .issue("short", IssueRequest::new("due.example.com"))
        .await
        .unwrap();
    let other = fx
        .services
        .issuance
        .issue("short", IssueRequest::new("other.example.com"))
        .await
        .unwrap();
    expire(&fx, &other, Utc::now() - Duration::hours(1)).await;

    let report = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.revoked, 1);
    assert!(!fx.services.issuance.get_cert(due.id).await.unwrap().alert);
}

#[tokio::test]
async fn test_unconfigured_notifier_skips_reminders_and_mailed_export() {
    let fx = Fixture::with_notifier(RecordingNotifier::unconfigured()).await;
    let ca = fx.ca("Test CA").await;
    fx.profile("short", &ca, |p| p.validity = 5).await;
    let due = fx
        .services
        .issuance
        .issue("short", IssueRequest::new("due.example.com"))
        .await
        .unwrap();

    let report = fx.services.renewal.check_renewal().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.notified, 0);
    assert_eq!(report.failed, 0);
    assert!(!fx.services.issuance.get_cert(due.id).await.unwrap().alert);

    let err = fx
        .services
        .export
        .download(CertRef::Id(due.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Configuration(_)));
    assert_eq!(fx.notifier.count().await, 0);
}

#[tokio::test]
async fn test_scep_rejected_by_validator_issues_nothing() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("scep", &ca, |p| {
        p.scep_enabled = true;
        p.cloud_enabled = true;
        p.cloud_service = Some("intune".to_string());
    })
    .await;

    let validator = Arc::new(RecordingValidator::rejecting());
    let mut registry = ValidatorRegistry::new();
    registry.register("intune", validator.clone());
    let responder = fx.services.scep_responder().with_validators(registry);

    let (_, der) = device_csr("device-01", &["device-01.example.com"]);
    let err = responder
        .handle_enrollment(ScepRequest {
            csr_der: der,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PkiError::ScepRejected(_)));
    assert_eq!(cert_count(&fx).await, 0);
    assert_eq!(validator.failures.lock().await.len(), 1);
    assert!(validator.successes.lock().await.is_empty());
}

#[tokio::test]
async fn test_scep_enrollment_issues_for_csr_key() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("scep", &ca, |p| {
        p.scep_enabled = true;
        p.scep_challenge_password = Some("s3cret".to_string());
        p.cloud_enabled = true;
        p.cloud_service = Some("intune".to_string());
    })
    .await;

    let validator = Arc::new(RecordingValidator::default());
    let mut registry = ValidatorRegistry::new();
    registry.register("intune", validator.clone());
    let responder = fx.services.scep_responder().with_validators(registry);

    let (pem, der) = device_csr("device-01", &["device-01.example.com"]);
    let wrong = responder
        .handle_enrollment(ScepRequest {
            csr_der: der.clone(),
            challenge_password: Some("guess".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(wrong, PkiError::ScepRejected(_)));
    assert_eq!(*validator.validated.lock().await, 0);

    let stored = responder
        .handle_enrollment(ScepRequest {
            csr_der: der,
            challenge_password: Some("s3cret".to_string()),
            transaction_id: Some("tx-1".to_string()),
        })
        .await
        .unwrap();

    assert!(stored.scep);
    assert!(stored.key.is_empty());
    assert_eq!(stored.cn, "device-01");
    assert_eq!(stored.dns_names.as_deref(), Some("device-01.example.com"));
    assert_eq!(validator.successes.lock().await.len(), 1);
    assert_eq!(validator.failures.lock().await.len(), 1);

    let csr = ParsedCsr::from_pem(&pem).unwrap();
    let leaf = certificate_from_pem(&stored.cert).unwrap();
    assert!(same_public_key(&leaf.public_key().unwrap(), &csr.public_key).unwrap());

    let chain = responder.ca_certs().await.unwrap();
    assert_eq!(chain.len(), 1);
    assert!(leaf.verify(&chain[0].public_key().unwrap()).unwrap());
}

#[tokio::test]
async fn test_scep_configuration_errors() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("scep", &ca, |p| {
        p.scep_enabled = true;
        p.cloud_enabled = true;
        p.cloud_service = Some("jamf".to_string());
    })
    .await;

    let (_, der) = device_csr("device-01", &[]);
    let err = fx
        .services
        .scep_responder()
        .handle_enrollment(ScepRequest {
            csr_der: der,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Configuration(_)));

    let missing = fx
        .services
        .scep_responder()
        .with_profile("nope")
        .profile()
        .await
        .unwrap_err();
    assert!(matches!(missing, PkiError::NotFound { .. }));
}

struct UpstreamCa {
    key: openssl::pkey::PKey<openssl::pkey::Private>,
    cert: X509,
}

impl UpstreamCa {
    async fn new() -> Self {
        let key = generate_key(KeyType::Ecdsa, 256).await.unwrap();
        let cert = Self::sign(&key, None, &key, "Upstream CA", true);
        Self { key, cert }
    }

    fn sign<T: openssl::pkey::HasPublic>(
        public_key: &openssl::pkey::PKeyRef<T>,
        issuer: Option<&X509>,
        issuer_key: &openssl::pkey::PKeyRef<openssl::pkey::Private>,
        cn: &str,
        is_ca: bool,
    ) -> X509 {
        let subject =
            Subject::build(cn, &SubjectAttributes::default(), &SubjectAttributes::default())
                .unwrap();
        let now = Utc::now();
        let template = CertificateTemplate {
            serial: 4242,
            subject: subject.to_x509_name().unwrap(),
            not_before: now,
            not_after: now + Duration::days(90),
            is_ca,
            key_usage: KeyUsageBits::parse(None).unwrap(),
            extended_key_usage: ExtendedKeyUsages::parse(None).unwrap(),
            alt_names: Default::default(),
            ocsp_url: None,
            extra_extensions: vec![],
        };
        sign_certificate(
            &template,
            public_key,
            issuer.map(|c| &**c),
            issuer_key,
            SignatureAlgorithm::Default,
        )
        .unwrap()
    }
}

#[async_trait]
impl RemoteEnrollment for UpstreamCa {
    async fn enroll(
        &self,
        server: &pki_scep_servers::Model,
        request: &ScepRequest,
    ) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(server.url.starts_with("https://"), "bad url");
        let csr = ParsedCsr::from_der(&request.csr_der)?;
        let cert = Self::sign(
            &csr.public_key,
            Some(&self.cert),
            &self.key,
            &csr.subject.common_name,
            false,
        );
        Ok(cert.to_der()?)
    }
}

#[tokio::test]
async fn test_scep_delegates_to_remote_server() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let server = fx
        .services
        .scep_servers
        .create(NewScepServer {
            name: "upstream".to_string(),
            url: "https://scep.example.com/scep".to_string(),
            shared_secret: "shh".to_string(),
        })
        .await
        .unwrap();
    fx.profile("scep", &ca, |p| {
        p.scep_enabled = true;
        p.scep_server_enabled = true;
        p.scep_server_id = Some(server.id);
    })
    .await;

    let (_, der) = device_csr("device-02", &[]);
    let unconfigured = fx
        .services
        .scep_responder()
        .handle_enrollment(ScepRequest {
            csr_der: der.clone(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(unconfigured, PkiError::Configuration(_)));

    let upstream = Arc::new(UpstreamCa::new().await);
    let stored = fx
        .services
        .scep_responder()
        .with_remote_enrollment(upstream.clone())
        .handle_enrollment(ScepRequest {
            csr_der: der,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(stored.scep);
    assert_eq!(stored.cn, "device-02");
    assert_eq!(stored.serial_number, 4242);
    let leaf = certificate_from_pem(&stored.cert).unwrap();
    assert!(leaf.verify(&upstream.cert.public_key().unwrap()).unwrap());
}

#[tokio::test]
async fn test_pkcs12_download_roundtrip() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;
    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();

    let delivery = fx
        .services
        .export
        .download(CertRef::Id(cert.id), Some("hunter22".to_string()))
        .await
        .unwrap();
    let Pkcs12Delivery::Bundle { der, password } = delivery else {
        panic!("expected a bundle");
    };
    let parsed = Pkcs12::from_der(&der).unwrap().parse2(&password).unwrap();

    let leaf = parsed.cert.unwrap();
    let subject = Subject::from_x509_name(leaf.subject_name()).unwrap();
    assert_eq!(subject.common_name, "host.example.com");
    assert_eq!(subject.dn_string(), cert.subject);
    let chain: Vec<X509> = parsed.ca.unwrap().into_iter().collect();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].to_pem().unwrap(), ca.cert.as_bytes());
    assert!(same_public_key(&parsed.pkey.unwrap(), &leaf.public_key().unwrap()).unwrap());
}

async fn issue_and_export_under(
    key_type: KeyType,
    key_size: i32,
    digest: SignatureAlgorithm,
    expected: Nid,
) {
    let fx = Fixture::new().await;
    let ca = fx.ca_with("Test CA", key_type, key_size, digest).await;
    fx.profile("default", &ca, |p| {
        p.key_type = key_type;
        p.key_size = key_size;
        p.digest = digest;
    })
    .await;
    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();

    let ca_cert = certificate_from_pem(&ca.cert).unwrap();
    let leaf = certificate_from_pem(&cert.cert).unwrap();
    assert!(ca_cert.verify(&ca_cert.public_key().unwrap()).unwrap());
    assert!(leaf.verify(&ca_cert.public_key().unwrap()).unwrap());
    assert_eq!(leaf.signature_algorithm().object().nid(), expected);
    assert_eq!(KeyType::of_key(&private_key_from_pem(&cert.key).unwrap()).unwrap(), key_type);

    let delivery = fx
        .services
        .export
        .download(CertRef::Id(cert.id), Some("hunter22".to_string()))
        .await
        .unwrap();
    let Pkcs12Delivery::Bundle { der, password } = delivery else {
        panic!("expected a bundle");
    };
    let parsed = Pkcs12::from_der(&der).unwrap().parse2(&password).unwrap();
    assert_eq!(parsed.cert.unwrap().to_pem().unwrap(), cert.cert.as_bytes());
    assert!(parsed.pkey.is_some());
}

#[tokio::test]
async fn test_rsa_ca_issues_and_exports() {
    issue_and_export_under(
        KeyType::Rsa,
        2048,
        SignatureAlgorithm::Sha384WithRsa,
        Nid::SHA384WITHRSAENCRYPTION,
    )
    .await;
}

#[tokio::test]
async fn test_dsa_ca_issues_and_exports() {
    issue_and_export_under(
        KeyType::Dsa,
        2048,
        SignatureAlgorithm::DsaWithSha256,
        Nid::DSA_WITH_SHA256,
    )
    .await;
}

#[tokio::test]
async fn test_pkcs12_mailed_with_generated_password() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |p| {
        p.p12_mail_subject = Some("Your certificate".to_string());
    })
    .await;
    let cert = fx
        .services
        .issuance
        .issue(
            "default",
            IssueRequest {
                mail: Some("owner@example.com".to_string()),
                ..IssueRequest::new("laptop-7")
            },
        )
        .await
        .unwrap();

    let delivery = fx
        .services
        .export
        .download(CertRef::identity("laptop-7", "default"), None)
        .await
        .unwrap();
    let Pkcs12Delivery::Mailed {
        recipient,
        password: Some(password),
    } = delivery
    else {
        panic!("expected a mailed bundle with the password returned");
    };
    assert_eq!(recipient, "owner@example.com");
    assert_eq!(password.len(), 16);

    let sent = fx.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Your certificate");
    assert!(!sent[0].variables.contains_key("password"));
    let attachment = &sent[0].attachments[0];
    assert_eq!(attachment.filename, "laptop-7.p12");
    assert_eq!(attachment.content_type, "application/x-pkcs12");
    let parsed = Pkcs12::from_der(&attachment.data)
        .unwrap()
        .parse2(&password)
        .unwrap();
    assert_eq!(
        parsed.cert.unwrap().to_pem().unwrap(),
        cert.cert.as_bytes()
    );
}

#[tokio::test]
async fn test_csr_upload_cannot_be_exported() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |p| p.mail = Some("team@example.com".to_string()))
        .await;
    let (pem, _) = device_csr("printer-3", &["printer-3.example.com"]);

    let stored = fx.services.issuance.sign_csr("default", &pem).await.unwrap();
    assert!(stored.csr);
    assert!(!stored.scep);
    assert!(stored.key.is_empty());
    assert_eq!(stored.mail.as_deref(), Some("team@example.com"));
    assert_eq!(stored.organisation.as_deref(), Some("Acme"));

    let err = fx
        .services
        .export
        .download(CertRef::Id(stored.id), Some("pw".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));

    let malformed = fx.services.issuance.sign_csr("default", "garbage").await;
    assert!(matches!(malformed, Err(PkiError::Validation(_))));
}

#[tokio::test]
async fn test_resign_cert_keeps_key() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let profile = fx.profile("default", &ca, |_| {}).await;
    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();

    let resigned = fx
        .services
        .issuance
        .resign_cert(
            cert.id,
            SubjectAttributes {
                organisational_unit: Some("Ops".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(resigned.id, cert.id);
    assert!(resigned.serial_number > cert.serial_number);
    assert_eq!(resigned.organisational_unit.as_deref(), Some("Ops"));
    let before = certificate_from_pem(&cert.cert).unwrap();
    let after = certificate_from_pem(&resigned.cert).unwrap();
    assert!(same_public_key(&before.public_key().unwrap(), &after.public_key().unwrap()).unwrap());

    let listed = fx
        .services
        .issuance
        .list_certs_for_profile(profile.id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let by_cn = fx
        .services
        .issuance
        .get_cert_by_cn("host.example.com", Some("default"))
        .await
        .unwrap();
    assert_eq!(by_cn.serial_number, resigned.serial_number);
}

#[tokio::test]
async fn test_ca_lifecycle() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;

    let cert = certificate_from_pem(&ca.cert).unwrap();
    let hashes = issuer_hashes(&cert).unwrap();
    assert_eq!(ca.issuer_key_hash, hashes.key_hash);
    assert_eq!(ca.issuer_name_hash, hashes.name_hash);
    assert_eq!(cert.subject_key_id().unwrap().as_slice(), cert.authority_key_id().unwrap().as_slice());

    let duplicate = fx.services.cas.create_ca(NewCa {
        cn: "Test CA".to_string(),
        mail: None,
        subject: SubjectAttributes::default(),
        key_type: KeyType::Ecdsa,
        key_size: 256,
        digest: SignatureAlgorithm::Default,
        key_usage: None,
        extended_key_usage: None,
        days: 30,
        ocsp_url: None,
    });
    assert!(matches!(duplicate.await, Err(PkiError::Conflict(_))));

    let resigned = fx.services.cas.resign_ca(ca.id).await.unwrap();
    assert_eq!(resigned.key, ca.key);
    assert_ne!(resigned.cert, ca.cert);
    let resigned_cert = certificate_from_pem(&resigned.cert).unwrap();
    assert_eq!(serial_number(&resigned_cert).unwrap(), 2);

    let rekeyed = fx.services.cas.rekey_ca(ca.id).await.unwrap();
    assert_ne!(rekeyed.key, ca.key);
    assert_ne!(rekeyed.issuer_key_hash, ca.issuer_key_hash);

    assert_eq!(fx.services.cas.get_ca_by_cn("Test CA").await.unwrap().id, ca.id);
    assert_eq!(fx.services.cas.list_cas().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ca_csr_and_external_certificate() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let upstream = UpstreamCa::new().await;

    let csr_pem = fx.services.cas.generate_csr(ca.id).await.unwrap();
    let csr = ParsedCsr::from_pem(&csr_pem).unwrap();
    assert_eq!(csr.subject.common_name, "Test CA");

    let signed = UpstreamCa::sign(&csr.public_key, Some(&upstream.cert), &upstream.key, "Test CA", true);
    let updated = fx
        .services
        .cas
        .update_ca_cert(ca.id, &String::from_utf8(signed.to_pem().unwrap()).unwrap())
        .await
        .unwrap();
    assert_eq!(updated.issuer_key_hash, ca.issuer_key_hash);
    assert_ne!(updated.issuer_name_hash, ca.issuer_name_hash);

    let foreign = String::from_utf8(upstream.cert.to_pem().unwrap()).unwrap();
    let err = fx.services.cas.update_ca_cert(ca.id, &foreign).await.unwrap_err();
    assert!(matches!(err, PkiError::Validation(_)));
}

#[tokio::test]
async fn test_fix_issuer_hashes() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.ca("Second CA").await;

    let mut broken: pki_cas::ActiveModel = ca.clone().into();
    broken.issuer_key_hash = Set(String::new());
    broken.issuer_name_hash = Set(String::new());
    broken.update(fx.database.connection()).await.unwrap();

    assert_eq!(fx.services.cas.fix_issuer_hashes().await.unwrap(), 1);
    let repaired = fx.services.cas.get_ca(ca.id).await.unwrap();
    assert_eq!(repaired.issuer_key_hash, ca.issuer_key_hash);
    assert_eq!(repaired.issuer_name_hash, ca.issuer_name_hash);
    assert_eq!(fx.services.cas.fix_issuer_hashes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_scep_server_registry() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    let servers = &fx.services.scep_servers;

    let default = servers.get(pki_scep_servers::DEFAULT_SCEP_SERVER_ID).await.unwrap();
    assert_eq!(default.name, "Null");
    assert!(matches!(
        servers.delete(default.id).await,
        Err(PkiError::Conflict(_))
    ));

    let server = servers
        .create(NewScepServer {
            name: "upstream".to_string(),
            url: "https://scep.example.com".to_string(),
            shared_secret: "one".to_string(),
        })
        .await
        .unwrap();
    let updated = servers
        .update_by_name(
            "upstream",
            ScepServerUpdate {
                url: Some("https://scep2.example.com".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.url, "https://scep2.example.com");
    assert_eq!(updated.shared_secret, "one");

    fx.profile("bound", &ca, |p| p.scep_server_id = Some(server.id))
        .await;
    assert!(matches!(
        servers.delete(server.id).await,
        Err(PkiError::Conflict(_))
    ));

    let spare = servers
        .create(NewScepServer {
            name: "spare".to_string(),
            url: String::new(),
            shared_secret: String::new(),
        })
        .await
        .unwrap();
    servers.delete(spare.id).await.unwrap();
    assert_eq!(servers.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_default_scep_profile_resolution() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("plain", &ca, |_| {}).await;
    fx.profile("devices", &ca, |p| p.scep_enabled = true).await;

    let profile = fx.services.profiles.find_scep_profile(None).await.unwrap();
    assert_eq!(profile.name, "devices");
    assert!(fx
        .services
        .profiles
        .find_scep_profile(Some("plain"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_scheduler_runs_sweeps() {
    let fx = Fixture::new().await;
    let ca = fx.ca("Test CA").await;
    fx.profile("default", &ca, |_| {}).await;
    let cert = fx
        .services
        .issuance
        .issue("default", IssueRequest::new("host.example.com"))
        .await
        .unwrap();
    expire(&fx, &cert, Utc::now() - Duration::days(2)).await;

    let scheduler = RenewalScheduler::start(
        fx.services.renewal.clone(),
        std::time::Duration::from_millis(20),
    );
    for _ in 0..100 {
        if cert_count(&fx).await == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    scheduler.stop();

    assert_eq!(cert_count(&fx).await, 0);
    assert_eq!(revoked_count(&fx).await, 1);
}
