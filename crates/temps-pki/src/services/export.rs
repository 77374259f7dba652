//! PKCS#12 export of certificates whose private key the engine holds.

use openssl::pkcs12::Pkcs12;
use openssl::stack::Stack;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::EntityTrait;
use std::collections::HashMap;
use std::sync::Arc;
use temps_core::notifications::{EmailAttachment, EmailMessage, NotificationService};
use temps_database::DbConnection;
use temps_entities::{pki_certs, pki_profiles};
use tracing::info;

use super::issuance::load_ca;
use super::renewal::resolve_recipient;
use super::revocation::find_cert;
use crate::config::PkiConfig;
use crate::crypto::certificate::certificate_from_pem;
use crate::crypto::keys::private_key_from_pem;
use crate::error::{PkiError, PkiResult};
use crate::models::{CertRef, Pkcs12Delivery};

const PKCS12_CONTENT_TYPE: &str = "application/x-pkcs12";

fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub struct ExportService {
    db: Arc<DbConnection>,
    config: PkiConfig,
    notification_service: Option<Arc<dyn NotificationService>>,
}

impl ExportService {
    pub fn new(db: Arc<DbConnection>, config: PkiConfig) -> Self {
        Self {
            db,
            config,
            notification_service: None,
        }
    }

    pub fn with_notification_service(
        mut self,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        self.notification_service = Some(notification_service);
        self
    }

    /// Bundles key, certificate and issuing CA. Without a caller password
    /// one is generated and the bundle is mailed instead of returned.
    pub async fn download(
        &self,
        cert: CertRef,
        password: Option<String>,
    ) -> PkiResult<Pkcs12Delivery> {
        let cert = find_cert(self.db.as_ref(), &cert).await?;
        if cert.key.trim().is_empty() {
            return Err(PkiError::Validation(format!(
                "certificate {} has no private key to export",
                cert.cn
            )));
        }

        match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                let der = self.bundle(&cert, &password).await?;
                info!("Exported PKCS#12 bundle for {}", cert.cn);
                Ok(Pkcs12Delivery::Bundle { der, password })
            }
            None => {
                let profile = pki_profiles::Entity::find_by_id(cert.profile_id)
                    .one(self.db.as_ref())
                    .await?
                    .ok_or_else(|| PkiError::not_found("Profile", cert.profile_id))?;
                let password = generate_password(self.config.p12_password_length);
                let der = self.bundle(&cert, &password).await?;
                self.mail(&cert, &profile, der, password).await
            }
        }
    }

    async fn bundle(&self, cert: &pki_certs::Model, password: &str) -> PkiResult<Vec<u8>> {
        let ca = load_ca(self.db.as_ref(), cert.ca_id).await?;
        let key = private_key_from_pem(&cert.key)?;
        let leaf = certificate_from_pem(&cert.cert)?;

        let mut chain = Stack::new()?;
        chain.push(ca.cert)?;
        let pkcs12 = Pkcs12::builder()
            .name(&cert.cn)
            .pkey(&key)
            .cert(&leaf)
            .ca(chain)
            .build2(password)?;
        Ok(pkcs12.to_der()?)
    }

    async fn mail(
        &self,
        cert: &pki_certs::Model,
        profile: &pki_profiles::Model,
        der: Vec<u8>,
        password: String,
    ) -> PkiResult<Pkcs12Delivery> {
        let recipient = resolve_recipient(cert.mail.as_deref(), profile, &self.config)
            .ok_or_else(|| {
                PkiError::Configuration(format!("no recipient to mail the bundle of {}", cert.cn))
            })?;
        let notifier = self.notification_service.as_ref().ok_or_else(|| {
            PkiError::Configuration("no notification service to mail the bundle".to_string())
        })?;
        if !notifier.is_configured().await? {
            return Err(PkiError::Configuration(
                "notification service is not configured".to_string(),
            ));
        }

        let mut variables = HashMap::new();
        variables.insert("cn".to_string(), cert.cn.clone());
        variables.insert("profile".to_string(), profile.name.clone());
        if profile.p12_mail_password {
            variables.insert("password".to_string(), password.clone());
        }

        let message = EmailMessage {
            to: vec![recipient.clone()],
            subject: profile
                .p12_mail_subject
                .clone()
                .unwrap_or_else(|| format!("Certificate {}", cert.cn)),
            body: format!("The certificate bundle for {} is attached.", cert.cn),
            from: Some(
                profile
                    .p12_mail_from
                    .clone()
                    .unwrap_or_else(|| self.config.mail_from.clone()),
            ),
            template: Some("pki_certificate".to_string()),
            header: profile.p12_mail_header.clone(),
            footer: profile.p12_mail_footer.clone(),
            variables,
            attachments: vec![EmailAttachment {
                filename: format!("{}.p12", cert.cn),
                content_type: PKCS12_CONTENT_TYPE.to_string(),
                data: der,
            }],
            ..Default::default()
        };
        notifier.send_email(message).await?;

        info!("Mailed PKCS#12 bundle for {} to {}", cert.cn, recipient);
        Ok(Pkcs12Delivery::Mailed {
            recipient,
            password: (!profile.p12_mail_password).then_some(password),
        })
    }
}
