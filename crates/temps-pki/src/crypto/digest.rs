use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::keys::KeyType;
use crate::error::{PkiError, PkiResult};

/// Signature algorithm, persisted as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum SignatureAlgorithm {
    /// SHA-256 with whatever key signs.
    #[default]
    Default,
    Sha1WithRsa,
    Sha256WithRsa,
    Sha384WithRsa,
    Sha512WithRsa,
    DsaWithSha1,
    DsaWithSha256,
    EcdsaWithSha1,
    EcdsaWithSha256,
    EcdsaWithSha384,
    EcdsaWithSha512,
}

impl SignatureAlgorithm {
    pub fn from_code(code: i32) -> PkiResult<Self> {
        Ok(match code {
            0 => SignatureAlgorithm::Default,
            3 => SignatureAlgorithm::Sha1WithRsa,
            4 => SignatureAlgorithm::Sha256WithRsa,
            5 => SignatureAlgorithm::Sha384WithRsa,
            6 => SignatureAlgorithm::Sha512WithRsa,
            7 => SignatureAlgorithm::DsaWithSha1,
            8 => SignatureAlgorithm::DsaWithSha256,
            9 => SignatureAlgorithm::EcdsaWithSha1,
            10 => SignatureAlgorithm::EcdsaWithSha256,
            11 => SignatureAlgorithm::EcdsaWithSha384,
            12 => SignatureAlgorithm::EcdsaWithSha512,
            1 | 2 => {
                return Err(PkiError::validation("MD2 and MD5 signatures are not allowed"))
            }
            13..=15 => {
                return Err(PkiError::validation("RSA-PSS signatures are not supported"))
            }
            16 => return Err(PkiError::validation("Ed25519 signatures are not supported")),
            other => {
                return Err(PkiError::Validation(format!(
                    "unknown signature algorithm {}",
                    other
                )))
            }
        })
    }

    pub fn code(self) -> i32 {
        match self {
            SignatureAlgorithm::Default => 0,
            SignatureAlgorithm::Sha1WithRsa => 3,
            SignatureAlgorithm::Sha256WithRsa => 4,
            SignatureAlgorithm::Sha384WithRsa => 5,
            SignatureAlgorithm::Sha512WithRsa => 6,
            SignatureAlgorithm::DsaWithSha1 => 7,
            SignatureAlgorithm::DsaWithSha256 => 8,
            SignatureAlgorithm::EcdsaWithSha1 => 9,
            SignatureAlgorithm::EcdsaWithSha256 => 10,
            SignatureAlgorithm::EcdsaWithSha384 => 11,
            SignatureAlgorithm::EcdsaWithSha512 => 12,
        }
    }

    /// Key family the algorithm belongs to, `None` for the default.
    pub fn key_type(self) -> Option<KeyType> {
        match self {
            SignatureAlgorithm::Default => None,
            SignatureAlgorithm::Sha1WithRsa
            | SignatureAlgorithm::Sha256WithRsa
            | SignatureAlgorithm::Sha384WithRsa
            | SignatureAlgorithm::Sha512WithRsa => Some(KeyType::Rsa),
            SignatureAlgorithm::DsaWithSha1 | SignatureAlgorithm::DsaWithSha256 => {
                Some(KeyType::Dsa)
            }
            SignatureAlgorithm::EcdsaWithSha1
            | SignatureAlgorithm::EcdsaWithSha256
            | SignatureAlgorithm::EcdsaWithSha384
            | SignatureAlgorithm::EcdsaWithSha512 => Some(KeyType::Ecdsa),
        }
    }

    pub fn check_key_type(self, key_type: KeyType) -> PkiResult<()> {
        match self.key_type() {
            Some(family) if family != key_type => Err(PkiError::Validation(format!(
                "signature algorithm {} cannot be used with a {} key",
                self, key_type
            ))),
            _ => Ok(()),
        }
    }

    pub fn message_digest_for(self, key_type: KeyType) -> PkiResult<MessageDigest> {
        self.check_key_type(key_type)?;
        Ok(match self {
            SignatureAlgorithm::Sha1WithRsa
            | SignatureAlgorithm::DsaWithSha1
            | SignatureAlgorithm::EcdsaWithSha1 => MessageDigest::sha1(),
            SignatureAlgorithm::Sha384WithRsa | SignatureAlgorithm::EcdsaWithSha384 => {
                MessageDigest::sha384()
            }
            SignatureAlgorithm::Sha512WithRsa | SignatureAlgorithm::EcdsaWithSha512 => {
                MessageDigest::sha512()
            }
            SignatureAlgorithm::Default
            | SignatureAlgorithm::Sha256WithRsa
            | SignatureAlgorithm::DsaWithSha256
            | SignatureAlgorithm::EcdsaWithSha256 => MessageDigest::sha256(),
        })
    }
}

impl TryFrom<i32> for SignatureAlgorithm {
    type Error = PkiError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<SignatureAlgorithm> for i32 {
    fn from(algorithm: SignatureAlgorithm) -> Self {
        algorithm.code()
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::Default => "default",
            SignatureAlgorithm::Sha1WithRsa => "SHA1-RSA",
            SignatureAlgorithm::Sha256WithRsa => "SHA256-RSA",
            SignatureAlgorithm::Sha384WithRsa => "SHA384-RSA",
            SignatureAlgorithm::Sha512WithRsa => "SHA512-RSA",
            SignatureAlgorithm::DsaWithSha1 => "DSA-SHA1",
            SignatureAlgorithm::DsaWithSha256 => "DSA-SHA256",
            SignatureAlgorithm::EcdsaWithSha1 => "ECDSA-SHA1",
            SignatureAlgorithm::EcdsaWithSha256 => "ECDSA-SHA256",
            SignatureAlgorithm::EcdsaWithSha384 => "ECDSA-SHA384",
            SignatureAlgorithm::EcdsaWithSha512 => "ECDSA-SHA512",
        };
        f.write_str(name)
    }
}
