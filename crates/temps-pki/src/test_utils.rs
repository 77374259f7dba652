//! Test doubles and fixtures shared by the crate's tests.

use async_trait::async_trait;
use openssl::x509::X509Ref;
use std::sync::Arc;
use temps_core::notifications::{EmailMessage, NotificationError, NotificationService};
use temps_database::test_utils::TestDatabase;
use temps_entities::{pki_cas, pki_profiles};
use tokio::sync::Mutex;

use crate::config::PkiConfig;
use crate::crypto::{KeyType, SignatureAlgorithm, SubjectAttributes};
use crate::models::{NewCa, NewProfile};
use crate::services::{CloudValidator, PkiServices};

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: bool,
    pub unconfigured: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Default::default()
        }
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send_email(&self, message: EmailMessage) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::ServiceUnavailable(
                "smtp relay down".to_string(),
            ));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }

    async fn is_configured(&self) -> Result<bool, NotificationError> {
        Ok(!self.unconfigured)
    }
}

#[derive(Default)]
pub struct RecordingValidator {
    pub reject: bool,
    pub validated: Mutex<usize>,
    pub failures: Mutex<Vec<String>>,
    pub successes: Mutex<Vec<String>>,
}

impl RecordingValidator {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CloudValidator for RecordingValidator {
    async fn validate_request(&self, _csr_der: &[u8]) -> anyhow::Result<()> {
        *self.validated.lock().await += 1;
        if self.reject {
            anyhow::bail!("device is not compliant");
        }
        Ok(())
    }

    async fn failure_reply(
        &self,
        _cert: Option<&X509Ref>,
        _csr_der: &[u8],
        message: &str,
    ) -> anyhow::Result<()> {
        self.failures.lock().await.push(message.to_string());
        Ok(())
    }

    async fn success_reply(
        &self,
        _cert: &X509Ref,
        _csr_der: &[u8],
        message: &str,
    ) -> anyhow::Result<()> {
        self.successes.lock().await.push(message.to_string());
        Ok(())
    }
}

pub struct Fixture {
    pub database: TestDatabase,
    pub services: PkiServices,
    pub notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    pub async fn new() -> Fixture {
        Self::with_notifier(RecordingNotifier::default()).await
    }

    /// Fixture on the shared PostgreSQL container, `None` when docker is unavailable.
    pub async fn postgres() -> Option<Fixture> {
        match TestDatabase::with_migrations().await {
            Ok(database) => Some(Self::on(database, RecordingNotifier::default())),
            Err(e) => {
                println!("⏭️  Skipping PostgreSQL test: {}", e);
                None
            }
        }
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Fixture {
        let database = TestDatabase::in_memory().await.unwrap();
        Self::on(database, notifier)
    }

    fn on(database: TestDatabase, notifier: RecordingNotifier) -> Fixture {
        let notifier = Arc::new(notifier);
        let config = PkiConfig {
            alert_email: Some("pki-alerts@example.com".to_string()),
            ..Default::default()
        };
        let services =
            PkiServices::with_notification_service(database.connection_arc(), config, notifier.clone());
        Fixture {
            database,
            services,
            notifier,
        }
    }

    pub async fn ca(&self, cn: &str) -> pki_cas::Model {
        self.ca_with(cn, KeyType::Ecdsa, 256, SignatureAlgorithm::EcdsaWithSha256)
            .await
    }

    pub async fn ca_with(
        &self,
        cn: &str,
        key_type: KeyType,
        key_size: i32,
        digest: SignatureAlgorithm,
    ) -> pki_cas::Model {
        self.services
            .cas
            .create_ca(NewCa {
                cn: cn.to_string(),
                mail: Some("ca@example.com".to_string()),
                subject: SubjectAttributes {
                    organisation: Some("Acme".to_string()),
                    country: Some("CA".to_string()),
                    ..Default::default()
                },
                key_type,
                key_size,
                digest,
                key_usage: None,
                extended_key_usage: None,
                days: 3650,
                ocsp_url: None,
            })
            .await
            .unwrap()
    }

    /// ECDSA profile with client and server auth, tweaked by `customize`.
    pub async fn profile(
        &self,
        name: &str,
        ca: &pki_cas::Model,
        customize: impl FnOnce(&mut NewProfile),
    ) -> pki_profiles::Model {
        let mut request = NewProfile::new(name, ca.id);
        request.key_type = KeyType::Ecdsa;
        request.key_size = 256;
        request.digest = SignatureAlgorithm::EcdsaWithSha256;
        request.key_usage = Some("1|4".to_string());
        request.extended_key_usage = Some("1|2".to_string());
        request.subject = SubjectAttributes {
            organisation: Some("Acme".to_string()),
            locality: Some("Montreal".to_string()),
            country: Some("CA".to_string()),
            ..Default::default()
        };
        customize(&mut request);
        self.services.profiles.create_profile(request).await.unwrap()
    }
}

/// A device CSR as rcgen would produce it, PEM and DER.
pub fn device_csr(cn: &str, dns: &[&str]) -> (String, Vec<u8>) {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    let mut params =
        CertificateParams::new(dns.iter().map(|d| d.to_string()).collect::<Vec<_>>()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    let key = KeyPair::generate().unwrap();
    let csr = params.serialize_request(&key).unwrap();
    (csr.pem().unwrap(), csr.der().to_vec())
}
