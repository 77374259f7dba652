//! Key generation and signing, one backend per key algorithm.

use openssl::dsa::Dsa;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509ReqBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo};

use super::digest::SignatureAlgorithm;
use crate::error::{PkiError, PkiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KeyType {
    #[default]
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "DSA")]
    Dsa,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ecdsa => "ECDSA",
            KeyType::Dsa => "DSA",
        }
    }

    /// RSA needs at least 2048 bits, ECDSA a named curve size, DSA one of the FIPS 186 sizes.
    pub fn validate_size(self, bits: i32) -> PkiResult<()> {
        let valid = match self {
            KeyType::Rsa => bits >= 2048,
            KeyType::Ecdsa => matches!(bits, 256 | 384 | 521),
            KeyType::Dsa => matches!(bits, 1024 | 2048 | 3072),
        };
        if valid {
            Ok(())
        } else {
            Err(PkiError::Validation(format!(
                "invalid key size {} for key type {}",
                bits, self
            )))
        }
    }

    pub(crate) fn of_key<T>(key: &PKeyRef<T>) -> PkiResult<KeyType> {
        match key.id() {
            Id::RSA => Ok(KeyType::Rsa),
            Id::EC => Ok(KeyType::Ecdsa),
            Id::DSA => Ok(KeyType::Dsa),
            other => Err(PkiError::Crypto(format!(
                "unsupported key algorithm {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RSA" => Ok(KeyType::Rsa),
            "ECDSA" | "EC" => Ok(KeyType::Ecdsa),
            "DSA" => Ok(KeyType::Dsa),
            other => Err(PkiError::Validation(format!("unknown key type: {}", other))),
        }
    }
}

/// Capability set of one key algorithm. Pick it once with [`backend_for`]
/// and use it for every key and signature of a CA or profile.
pub trait KeyBackend: Send + Sync {
    fn key_type(&self) -> KeyType;

    fn generate(&self, bits: i32) -> PkiResult<PKey<Private>>;

    fn message_digest(&self, algorithm: SignatureAlgorithm) -> PkiResult<MessageDigest> {
        algorithm.message_digest_for(self.key_type())
    }

    fn sign_certificate(
        &self,
        builder: &mut X509Builder,
        key: &PKeyRef<Private>,
        algorithm: SignatureAlgorithm,
    ) -> PkiResult<()> {
        self.check_key(key)?;
        let digest = self.message_digest(algorithm)?;
        builder.sign(key, digest)?;
        Ok(())
    }

    fn sign_request(
        &self,
        builder: &mut X509ReqBuilder,
        key: &PKeyRef<Private>,
        algorithm: SignatureAlgorithm,
    ) -> PkiResult<()> {
        self.check_key(key)?;
        let digest = self.message_digest(algorithm)?;
        builder.sign(key, digest)?;
        Ok(())
    }

    /// SHA-1 over the subjectPublicKey bit string of a DER SubjectPublicKeyInfo.
    fn compute_skid(&self, spki_der: &[u8]) -> PkiResult<Vec<u8>> {
        spki_key_id(spki_der)
    }

    fn check_key(&self, key: &PKeyRef<Private>) -> PkiResult<()> {
        let actual = KeyType::of_key(key)?;
        if actual != self.key_type() {
            return Err(PkiError::Crypto(format!(
                "{} key cannot be used with the {} backend",
                actual,
                self.key_type()
            )));
        }
        Ok(())
    }
}

pub struct RsaBackend;

impl KeyBackend for RsaBackend {
    fn key_type(&self) -> KeyType {
        KeyType::Rsa
    }

    fn generate(&self, bits: i32) -> PkiResult<PKey<Private>> {
        KeyType::Rsa.validate_size(bits)?;
        let rsa = Rsa::generate(bits as u32)?;
        Ok(PKey::from_rsa(rsa)?)
    }
}

pub struct EcdsaBackend;

impl EcdsaBackend {
    fn curve(bits: i32) -> PkiResult<Nid> {
        match bits {
            256 => Ok(Nid::X9_62_PRIME256V1),
            384 => Ok(Nid::SECP384R1),
            521 => Ok(Nid::SECP521R1),
            _ => Err(PkiError::Validation(format!(
                "invalid key size {} for key type ECDSA",
                bits
            ))),
        }
    }
}

impl KeyBackend for EcdsaBackend {
    fn key_type(&self) -> KeyType {
        KeyType::Ecdsa
    }

    fn generate(&self, bits: i32) -> PkiResult<PKey<Private>> {
        let group = EcGroup::from_curve_name(Self::curve(bits)?)?;
        let ec = EcKey::generate(&group)?;
        Ok(PKey::from_ec_key(ec)?)
    }
}

pub struct DsaBackend;

impl KeyBackend for DsaBackend {
    fn key_type(&self) -> KeyType {
        KeyType::Dsa
    }

    fn generate(&self, bits: i32) -> PkiResult<PKey<Private>> {
        KeyType::Dsa.validate_size(bits)?;
        let dsa = Dsa::generate(bits as u32)?;
        Ok(PKey::from_dsa(dsa)?)
    }
}

static RSA: RsaBackend = RsaBackend;
static ECDSA: EcdsaBackend = EcdsaBackend;
static DSA: DsaBackend = DsaBackend;

pub fn backend_for(key_type: KeyType) -> &'static dyn KeyBackend {
    match key_type {
        KeyType::Rsa => &RSA,
        KeyType::Ecdsa => &ECDSA,
        KeyType::Dsa => &DSA,
    }
}

/// Backend matching an existing key, e.g. a CA key loaded from storage.
pub fn backend_for_key<T>(key: &PKeyRef<T>) -> PkiResult<&'static dyn KeyBackend> {
    Ok(backend_for(KeyType::of_key(key)?))
}

/// Generates a key on the blocking pool; RSA and DSA generation can take seconds.
pub async fn generate_key(key_type: KeyType, bits: i32) -> PkiResult<PKey<Private>> {
    key_type.validate_size(bits)?;
    tokio::task::spawn_blocking(move || backend_for(key_type).generate(bits))
        .await
        .map_err(|e| PkiError::Crypto(format!("key generation aborted: {}", e)))?
}

pub fn public_only<T: HasPublic>(key: &PKeyRef<T>) -> PkiResult<PKey<Public>> {
    Ok(PKey::public_key_from_der(&key.public_key_to_der()?)?)
}

pub fn spki_key_id(spki_der: &[u8]) -> PkiResult<Vec<u8>> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der)
        .map_err(|e| PkiError::Crypto(format!("invalid public key: {}", e)))?;
    Ok(openssl::sha::sha1(&spki.subject_public_key.data).to_vec())
}

pub fn key_id<T: HasPublic>(key: &PKeyRef<T>) -> PkiResult<Vec<u8>> {
    backend_for_key(key)?.compute_skid(&key.public_key_to_der()?)
}

pub fn private_key_to_pem(key: &PKeyRef<Private>) -> PkiResult<String> {
    let pem = key.private_key_to_pem_pkcs8()?;
    String::from_utf8(pem).map_err(|e| PkiError::Crypto(e.to_string()))
}

pub fn private_key_from_pem(pem: &str) -> PkiResult<PKey<Private>> {
    Ok(PKey::private_key_from_pem(pem.as_bytes())?)
}

/// True when both keys hold the same public component.
pub fn same_public_key<A: HasPublic, B: HasPublic>(
    a: &PKeyRef<A>,
    b: &PKeyRef<B>,
) -> PkiResult<bool> {
    Ok(a.public_key_to_der()? == b.public_key_to_der()?)
}
