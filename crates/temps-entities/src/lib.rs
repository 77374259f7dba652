pub mod pki_cas;
pub mod pki_certs;
pub mod pki_profiles;
pub mod pki_revoked_certs;
pub mod pki_scep_servers;
