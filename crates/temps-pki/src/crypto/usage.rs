//! Key usage and extended key usage lists as stored on CAs and profiles.

use openssl::x509::extension::{ExtendedKeyUsage, KeyUsage};
use openssl::x509::X509Extension;

use crate::error::{PkiError, PkiResult};

const DIGITAL_SIGNATURE: u16 = 1;
const CONTENT_COMMITMENT: u16 = 2;
const KEY_ENCIPHERMENT: u16 = 4;
const DATA_ENCIPHERMENT: u16 = 8;
const KEY_AGREEMENT: u16 = 16;
const KEY_CERT_SIGN: u16 = 32;
const CRL_SIGN: u16 = 64;
const ENCIPHER_ONLY: u16 = 128;
const DECIPHER_ONLY: u16 = 256;

/// Extended key usage OIDs indexed by their stored number.
const EXTENDED_KEY_USAGES: [&str; 14] = [
    "2.5.29.37.0",
    "1.3.6.1.5.5.7.3.1",
    "1.3.6.1.5.5.7.3.2",
    "1.3.6.1.5.5.7.3.3",
    "1.3.6.1.5.5.7.3.4",
    "1.3.6.1.5.5.7.3.5",
    "1.3.6.1.5.5.7.3.6",
    "1.3.6.1.5.5.7.3.7",
    "1.3.6.1.5.5.7.3.8",
    "1.3.6.1.5.5.7.3.9",
    "1.3.6.1.4.1.311.10.3.3",
    "2.16.840.1.113730.4.1",
    "1.3.6.1.4.1.311.2.1.22",
    "1.3.6.1.4.1.311.61.1.1",
];

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split('|').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageBits(u16);

impl KeyUsageBits {
    /// Parses a pipe separated list such as `1|4|32`.
    pub fn parse(value: Option<&str>) -> PkiResult<Self> {
        let mut bits = 0u16;
        for item in split_list(value.unwrap_or_default()) {
            let bit: u16 = item
                .parse()
                .map_err(|_| PkiError::Validation(format!("invalid key usage: {}", item)))?;
            if bit == 0 || !bit.is_power_of_two() || bit > DECIPHER_ONLY {
                return Err(PkiError::Validation(format!("invalid key usage: {}", item)));
            }
            bits |= bit;
        }
        Ok(KeyUsageBits(bits))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, bit: u16) -> bool {
        self.0 & bit == bit
    }

    pub fn with(self, bit: u16) -> Self {
        KeyUsageBits(self.0 | bit)
    }

    /// A CA certificate always carries certificate and CRL signing.
    pub fn for_ca(self) -> Self {
        self.with(KEY_CERT_SIGN).with(CRL_SIGN)
    }

    pub fn to_extension(self) -> PkiResult<Option<X509Extension>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut usage = KeyUsage::new();
        usage.critical();
        if self.contains(DIGITAL_SIGNATURE) {
            usage.digital_signature();
        }
        if self.contains(CONTENT_COMMITMENT) {
            usage.non_repudiation();
        }
        if self.contains(KEY_ENCIPHERMENT) {
            usage.key_encipherment();
        }
        if self.contains(DATA_ENCIPHERMENT) {
            usage.data_encipherment();
        }
        if self.contains(KEY_AGREEMENT) {
            usage.key_agreement();
        }
        if self.contains(KEY_CERT_SIGN) {
            usage.key_cert_sign();
        }
        if self.contains(CRL_SIGN) {
            usage.crl_sign();
        }
        if self.contains(ENCIPHER_ONLY) {
            usage.encipher_only();
        }
        if self.contains(DECIPHER_ONLY) {
            usage.decipher_only();
        }
        Ok(Some(usage.build()?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsages(Vec<&'static str>);

impl ExtendedKeyUsages {
    pub fn parse(value: Option<&str>) -> PkiResult<Self> {
        let mut oids = Vec::new();
        for item in split_list(value.unwrap_or_default()) {
            let oid = item
                .parse::<usize>()
                .ok()
                .and_then(|index| EXTENDED_KEY_USAGES.get(index))
                .ok_or_else(|| {
                    PkiError::Validation(format!("invalid extended key usage: {}", item))
                })?;
            if !oids.contains(oid) {
                oids.push(*oid);
            }
        }
        Ok(ExtendedKeyUsages(oids))
    }

    pub fn oids(&self) -> &[&'static str] {
        &self.0
    }

    pub fn to_extension(&self) -> PkiResult<Option<X509Extension>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        let mut usage = ExtendedKeyUsage::new();
        for oid in &self.0 {
            usage.other(oid);
        }
        Ok(Some(usage.build()?))
    }
}
