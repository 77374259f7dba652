pub mod certificate;
pub mod csr;
pub mod digest;
pub mod keys;
pub mod subject;
pub mod usage;

pub use certificate::{CertificateTemplate, IssuerHashes, RawExtension, SubjectAltNames};
pub use csr::ParsedCsr;
pub use digest::SignatureAlgorithm;
pub use keys::{backend_for, generate_key, KeyBackend, KeyType};
pub use subject::{Subject, SubjectAttributes};
pub use usage::{ExtendedKeyUsages, KeyUsageBits};
