//! Renewal sweep over active certificates and its background scheduler.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use temps_core::notifications::{EmailMessage, NotificationService};
use temps_database::DbConnection;
use temps_entities::{pki_certs, pki_profiles};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::revocation::revoke_in;
use crate::config::PkiConfig;
use crate::error::{PkiError, PkiResult};
use crate::locks::PkiLocks;
use crate::models::{split_list, RevocationReason, SweepReport};

enum SweepAction {
    Revoked,
    Notified,
    Skipped,
    Untouched,
}

/// First address of the certificate, then the profile, then the alert address.
pub(crate) fn resolve_recipient(
    cert_mail: Option<&str>,
    profile: &pki_profiles::Model,
    config: &PkiConfig,
) -> Option<String> {
    split_list(cert_mail)
        .into_iter()
        .chain(split_list(profile.mail.as_deref()))
        .chain(config.alert_email.clone().filter(|m| !m.trim().is_empty()))
        .next()
}

pub struct RenewalSweeper {
    db: Arc<DbConnection>,
    locks: Arc<PkiLocks>,
    config: PkiConfig,
    notification_service: Option<Arc<dyn NotificationService>>,
}

impl RenewalSweeper {
    pub fn new(db: Arc<DbConnection>, locks: Arc<PkiLocks>, config: PkiConfig) -> Self {
        Self {
            db,
            locks,
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

    /// One pass over every active certificate that is expired or has no
    /// reminder sent yet. A failure on one certificate is logged and counted,
    /// never fatal.
    pub async fn check_renewal(&self) -> PkiResult<SweepReport> {
        let snapshot: Vec<i32> = pki_certs::Entity::find()
            .select_only()
            .column(pki_certs::Column::Id)
            .filter(
                Condition::any()
                    .add(pki_certs::Column::Alert.eq(false))
                    .add(pki_certs::Column::ValidUntil.lt(Utc::now())),
            )
            .order_by_asc(pki_certs::Column::Id)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let mut report = SweepReport::default();
        for id in snapshot {
            match self.process(id).await {
                Ok(SweepAction::Revoked) => report.revoked += 1,
                Ok(SweepAction::Notified) => report.notified += 1,
                Ok(SweepAction::Skipped) => report.skipped += 1,
                Ok(SweepAction::Untouched) => {}
                Err(e) => {
                    error!("Renewal check of certificate {} failed: {}", id, e);
                    report.failed += 1;
                }
            }
        }

        info!("Renewal sweep finished: {}", report);
        Ok(report)
    }

    async fn process(&self, id: i32) -> PkiResult<SweepAction> {
        let Some(peek) = pki_certs::Entity::find_by_id(id).one(self.db.as_ref()).await? else {
            debug!("Certificate {} left the active set during the sweep", id);
            return Ok(SweepAction::Skipped);
        };
        let _identity = self.locks.identity(&peek.cn, &peek.profile_name).await;

        let Some(cert) = pki_certs::Entity::find_by_id(id).one(self.db.as_ref()).await? else {
            return Ok(SweepAction::Skipped);
        };
        let profile = pki_profiles::Entity::find_by_id(cert.profile_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| PkiError::not_found("Profile", cert.profile_id))?;

        let now = Utc::now();
        if now > cert.valid_until {
            let txn = self.db.begin().await?;
            revoke_in(
                &txn,
                cert,
                RevocationReason::Superseded,
                profile.revoked_valid_until,
            )
            .await?;
            txn.commit().await?;
            return Ok(SweepAction::Revoked);
        }

        let reminder_due =
            now >= cert.valid_until - Duration::days(i64::from(profile.days_before_renewal_mail));
        if cert.alert || !profile.renewal_mail || cert.scep || !reminder_due {
            return Ok(SweepAction::Untouched);
        }

        let Some(recipient) = resolve_recipient(cert.mail.as_deref(), &profile, &self.config)
        else {
            warn!("No recipient for the renewal reminder of {}", cert.cn);
            return Ok(SweepAction::Skipped);
        };
        let Some(notifier) = &self.notification_service else {
            warn!(
                "Renewal reminder for {} not sent: no notification service",
                cert.cn
            );
            return Ok(SweepAction::Skipped);
        };
        if !notifier.is_configured().await? {
            warn!(
                "Renewal reminder for {} not sent: notification service is not configured",
                cert.cn
            );
            return Ok(SweepAction::Skipped);
        }

        notifier
            .send_email(self.reminder(&cert, &profile, recipient))
            .await?;

        let cn = cert.cn.clone();
        let mut active: pki_certs::ActiveModel = cert.into();
        active.alert = Set(true);
        active.update(self.db.as_ref()).await?;
        info!("Sent renewal reminder for {} (profile {})", cn, profile.name);
        Ok(SweepAction::Notified)
    }

    fn reminder(
        &self,
        cert: &pki_certs::Model,
        profile: &pki_profiles::Model,
        recipient: String,
    ) -> EmailMessage {
        let mut variables = HashMap::new();
        variables.insert("cn".to_string(), cert.cn.clone());
        variables.insert("profile".to_string(), profile.name.clone());
        variables.insert("ca".to_string(), cert.ca_name.clone());
        variables.insert("valid_until".to_string(), cert.valid_until.to_rfc3339());

        EmailMessage {
            to: vec![recipient],
            subject: profile.renewal_mail_subject.clone(),
            body: format!(
                "The certificate {} expires on {}.",
                cert.cn,
                cert.valid_until.format("%Y-%m-%d")
            ),
            from: Some(
                profile
                    .renewal_mail_from
                    .clone()
                    .unwrap_or_else(|| self.config.mail_from.clone()),
            ),
            template: Some("pki_renewal".to_string()),
            header: profile.renewal_mail_header.clone(),
            footer: profile.renewal_mail_footer.clone(),
            variables,
            ..Default::default()
        }
    }
}

/// Runs the sweeper on a fixed period until stopped.
pub struct RenewalScheduler {
    handle: JoinHandle<()>,
}

impl RenewalScheduler {
    pub fn start(sweeper: Arc<RenewalSweeper>, period: std::time::Duration) -> Arc<Self> {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sweeper.check_renewal().await {
                    Ok(report) => debug!("Scheduled renewal sweep: {}", report),
                    Err(e) => error!("Scheduled renewal sweep failed: {}", e),
                }
            }
        });

        info!("Renewal scheduler started (every {:?})", period);
        Arc::new(Self { handle })
    }

    pub fn stop(&self) {
        self.handle.abort();
        info!("Renewal scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
