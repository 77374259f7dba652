pub mod ca_service;
pub mod export;
pub mod issuance;
pub mod profile_service;
pub mod renewal;
pub mod revocation;
pub mod scep;
pub mod scep_server_service;

pub use ca_service::CaService;
pub use export::ExportService;
pub use issuance::IssuanceService;
pub use profile_service::ProfileService;
pub use renewal::{RenewalScheduler, RenewalSweeper};
pub use revocation::RevocationService;
pub use scep::{CloudValidator, RemoteEnrollment, ScepResponder, ValidatorRegistry};
pub use scep_server_service::{NewScepServer, ScepServerService, ScepServerUpdate};

use std::sync::Arc;
use temps_core::notifications::NotificationService;
use temps_database::DbConnection;

use crate::config::PkiConfig;
use crate::locks::PkiLocks;

/// Every PKI service over one connection pool and one set of locks.
pub struct PkiServices {
    pub cas: Arc<CaService>,
    pub profiles: Arc<ProfileService>,
    pub issuance: Arc<IssuanceService>,
    pub revocation: Arc<RevocationService>,
    pub renewal: Arc<RenewalSweeper>,
    pub export: Arc<ExportService>,
    pub scep_servers: Arc<ScepServerService>,
    db: Arc<DbConnection>,
    config: PkiConfig,
}

impl PkiServices {
    pub fn new(db: Arc<DbConnection>, config: PkiConfig) -> Self {
        Self::build(db, config, None)
    }

    pub fn with_notification_service(
        db: Arc<DbConnection>,
        config: PkiConfig,
        notification_service: Arc<dyn NotificationService>,
    ) -> Self {
        Self::build(db, config, Some(notification_service))
    }

    fn build(
        db: Arc<DbConnection>,
        config: PkiConfig,
        notification_service: Option<Arc<dyn NotificationService>>,
    ) -> Self {
        let locks = PkiLocks::new();
        let mut renewal = RenewalSweeper::new(db.clone(), locks.clone(), config.clone());
        let mut export = ExportService::new(db.clone(), config.clone());
        if let Some(notifier) = notification_service {
            renewal = renewal.with_notification_service(notifier.clone());
            export = export.with_notification_service(notifier);
        }

        Self {
            cas: Arc::new(CaService::new(db.clone(), locks.clone())),
            profiles: Arc::new(ProfileService::new(db.clone())),
            issuance: Arc::new(IssuanceService::new(db.clone(), locks.clone())),
            revocation: Arc::new(RevocationService::new(db.clone(), locks)),
            renewal: Arc::new(renewal),
            export: Arc::new(export),
            scep_servers: Arc::new(ScepServerService::new(db.clone())),
            db,
            config,
        }
    }

    /// SCEP responder bound to the configured association name, if any.
    pub fn scep_responder(&self) -> ScepResponder {
        let responder = ScepResponder::new(self.db.clone(), self.issuance.clone());
        match &self.config.scep_profile {
            Some(name) => responder.with_profile(name.clone()),
            None => responder,
        }
    }

    pub fn start_renewal_scheduler(&self) -> Arc<RenewalScheduler> {
        RenewalScheduler::start(self.renewal.clone(), self.config.renewal_interval())
    }
}
