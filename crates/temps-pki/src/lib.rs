//! Certificate authority engine: CA and profile registries, issuance,
//! revocation, SCEP enrollment, renewal sweeps and PKCS#12 export.

pub mod config;
pub mod crypto;
pub mod error;
pub mod locks;
pub mod models;
pub mod serial;
pub mod services;

pub use config::PkiConfig;
pub use error::{PkiError, PkiResult};
pub use models::{
    CertRef, IssueRequest, NewCa, NewProfile, Pkcs12Delivery, ProfileRef, ProfileUpdate,
    RevocationReason, ScepRequest, SweepReport,
};
pub use services::{
    CaService, CloudValidator, ExportService, IssuanceService, PkiServices, ProfileService,
    RemoteEnrollment, RenewalScheduler, RenewalSweeper, RevocationService, ScepResponder,
    ScepServerService, ValidatorRegistry,
};

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;
