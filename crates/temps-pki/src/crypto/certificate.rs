//! Certificate assembly, signing and inspection.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time, Asn1TimeRef};
use openssl::bn::BigNum;
use openssl::pkey::{HasPublic, PKeyRef, Private};
use openssl::nid::Nid;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Extension, X509Name, X509Ref, X509v3Context, X509};
use std::net::IpAddr;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::digest::SignatureAlgorithm;
use super::keys::{backend_for_key, key_id};
use super::usage::{ExtendedKeyUsages, KeyUsageBits};
use crate::error::{PkiError, PkiResult};

pub const OID_SUBJECT_KEY_ID: &str = "2.5.29.14";
pub const OID_KEY_USAGE: &str = "2.5.29.15";
pub const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
pub const OID_BASIC_CONSTRAINTS: &str = "2.5.29.19";
pub const OID_AUTHORITY_KEY_ID: &str = "2.5.29.35";
pub const OID_EXT_KEY_USAGE: &str = "2.5.29.37";
pub const OID_AUTHORITY_INFO_ACCESS: &str = "1.3.6.1.5.5.7.1.1";

/// Extensions always recomputed by the signer, never carried over.
const SIGNER_EXTENSIONS: [&str; 4] = [
    OID_AUTHORITY_KEY_ID,
    OID_SUBJECT_KEY_ID,
    OID_BASIC_CONSTRAINTS,
    OID_SUBJECT_ALT_NAME,
];

/// Keeps the extensions a new certificate may inherit. `overridden` lists
/// OIDs the signing profile supplies itself.
pub fn carried_extensions<'a>(
    extensions: impl IntoIterator<Item = &'a RawExtension>,
    overridden: &[&str],
) -> Vec<RawExtension> {
    extensions
        .into_iter()
        .filter(|ext| {
            !SIGNER_EXTENSIONS.contains(&ext.oid.as_str()) && !overridden.contains(&ext.oid.as_str())
        })
        .cloned()
        .collect()
}

/// Extensions of an issued certificate, as raw DER values.
pub fn extensions_of(cert: &X509Ref) -> PkiResult<Vec<RawExtension>> {
    let der = cert.to_der()?;
    let (_, parsed) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::Crypto(format!("stored certificate does not parse: {}", e)))?;
    Ok(parsed
        .extensions()
        .iter()
        .map(|ext| RawExtension {
            oid: ext.oid.to_id_string(),
            critical: ext.critical,
            value: ext.value.to_vec(),
        })
        .collect())
}

/// An extension carried over verbatim, e.g. from a CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub oid: String,
    pub critical: bool,
    pub value: Vec<u8>,
}

impl RawExtension {
    fn to_extension(&self) -> PkiResult<X509Extension> {
        let oid = Asn1Object::from_str(&self.oid)?;
        let value = Asn1OctetString::new_from_bytes(&self.value)?;
        Ok(X509Extension::new_from_der(&oid, self.critical, &value)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    pub dns: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub emails: Vec<String>,
    pub uris: Vec<String>,
}

impl SubjectAltNames {
    pub fn is_empty(&self) -> bool {
        self.dns.is_empty() && self.ips.is_empty() && self.emails.is_empty() && self.uris.is_empty()
    }

    pub fn ip_strings(&self) -> Vec<String> {
        self.ips.iter().map(IpAddr::to_string).collect()
    }

    pub fn from_certificate(cert: &X509Ref) -> SubjectAltNames {
        let mut names = SubjectAltNames::default();
        if let Some(general_names) = cert.subject_alt_names() {
            for name in general_names.iter() {
                if let Some(dns) = name.dnsname() {
                    names.dns.push(dns.to_string());
                } else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                    names.ips.push(ip);
                } else if let Some(email) = name.email() {
                    names.emails.push(email.to_string());
                } else if let Some(uri) = name.uri() {
                    names.uris.push(uri.to_string());
                }
            }
        }
        names
    }
}

pub fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

pub fn parse_ip_list(values: &[String]) -> PkiResult<Vec<IpAddr>> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<IpAddr>()
                .map_err(|_| PkiError::Validation(format!("invalid IP address: {}", v)))
        })
        .collect()
}

pub struct CertificateTemplate {
    pub serial: i64,
    pub subject: X509Name,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    pub key_usage: KeyUsageBits,
    pub extended_key_usage: ExtendedKeyUsages,
    pub alt_names: SubjectAltNames,
    pub ocsp_url: Option<String>,
    pub extra_extensions: Vec<RawExtension>,
}

/// Builds and signs `template` for `public_key`. Without an issuer
/// certificate the result is self-signed by `issuer_key`.
pub fn sign_certificate<T: HasPublic>(
    template: &CertificateTemplate,
    public_key: &PKeyRef<T>,
    issuer: Option<&X509Ref>,
    issuer_key: &PKeyRef<Private>,
    algorithm: SignatureAlgorithm,
) -> PkiResult<X509> {
    if template.not_after <= template.not_before {
        return Err(PkiError::validation("validity must be at least one day"));
    }

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = BigNum::from_dec_str(&template.serial.to_string())?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&template.subject)?;
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.subject_name())?,
        None => builder.set_issuer_name(&template.subject)?,
    }
    builder.set_pubkey(public_key)?;
    builder.set_not_before(&*asn1_time(template.not_before)?)?;
    builder.set_not_after(&*asn1_time(template.not_after)?)?;

    // SKID goes in first: a self-signed AKID is read back from it.
    let skid = SubjectKeyIdentifier::new().build(&builder.x509v3_context(issuer, None))?;
    builder.append_extension(skid)?;
    // `keyid:always` fails for an issuer without SKID; plain `keyid` then omits the AKID.
    let issuer_has_skid = issuer.map_or(true, |i| i.subject_key_id().is_some());
    let akid = AuthorityKeyIdentifier::new()
        .keyid(issuer_has_skid)
        .build(&builder.x509v3_context(issuer, None))?;
    builder.append_extension(akid)?;

    if template.is_ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    }
    if let Some(ext) = template.key_usage.to_extension()? {
        builder.append_extension(ext)?;
    }
    if let Some(ext) = template.extended_key_usage.to_extension()? {
        builder.append_extension(ext)?;
    }
    if !template.alt_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in &template.alt_names.dns {
            san.dns(dns);
        }
        for ip in &template.alt_names.ips {
            san.ip(&ip.to_string());
        }
        for email in &template.alt_names.emails {
            san.email(email);
        }
        for uri in &template.alt_names.uris {
            san.uri(uri);
        }
        let ext = san.build(&builder.x509v3_context(issuer, None))?;
        builder.append_extension(ext)?;
    }
    if let Some(url) = template.ocsp_url.as_deref().filter(|u| !u.is_empty()) {
        let ext = ocsp_extension(&builder.x509v3_context(issuer, None), url)?;
        builder.append_extension(ext)?;
    }
    for raw in &template.extra_extensions {
        builder.append_extension(raw.to_extension()?)?;
    }

    backend_for_key(issuer_key)?.sign_certificate(&mut builder, issuer_key, algorithm)?;
    Ok(builder.build())
}

/// An OCSP responder URL: absolute http(s), printable ASCII, no separators
/// of the openssl config syntax.
pub fn validate_ocsp_url(url: &str) -> PkiResult<()> {
    let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
    let chars_ok = url
        .chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, ',' | '@' | '$' | '"' | '\\'));
    if !scheme_ok || !chars_ok {
        return Err(PkiError::Validation(format!("invalid OCSP URL: {:?}", url)));
    }
    Ok(())
}

/// authorityInfoAccess has no typed builder in openssl, only the config syntax.
#[allow(deprecated)]
fn ocsp_extension(context: &X509v3Context<'_>, url: &str) -> PkiResult<X509Extension> {
    validate_ocsp_url(url)?;
    Ok(X509Extension::new_nid(
        None,
        Some(context),
        Nid::INFO_ACCESS,
        &format!("OCSP;URI:{}", url),
    )?)
}

pub fn asn1_time(at: DateTime<Utc>) -> PkiResult<Asn1Time> {
    Ok(Asn1Time::from_unix(at.timestamp())?)
}

pub fn datetime_from_asn1(time: &Asn1TimeRef) -> PkiResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PkiError::Crypto("certificate time out of range".to_string()))
}

pub fn certificate_from_pem(pem: &str) -> PkiResult<X509> {
    Ok(X509::from_pem(pem.as_bytes())?)
}

pub fn certificate_to_pem(cert: &X509Ref) -> PkiResult<String> {
    String::from_utf8(cert.to_pem()?).map_err(|e| PkiError::Crypto(e.to_string()))
}

pub fn not_after(cert: &X509Ref) -> PkiResult<DateTime<Utc>> {
    datetime_from_asn1(cert.not_after())
}

pub fn not_before(cert: &X509Ref) -> PkiResult<DateTime<Utc>> {
    datetime_from_asn1(cert.not_before())
}

pub fn serial_number(cert: &X509Ref) -> PkiResult<i64> {
    let serial = cert.serial_number().to_bn()?.to_dec_str()?;
    serial
        .parse()
        .map_err(|_| PkiError::Crypto(format!("serial number {} out of range", &*serial)))
}

/// Lookup hashes of a CA certificate, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerHashes {
    pub key_hash: String,
    pub name_hash: String,
}

pub fn issuer_hashes(cert: &X509Ref) -> PkiResult<IssuerHashes> {
    let key_hash = hex::encode(key_id(&*cert.public_key()?)?);
    let name_hash = hex::encode(openssl::sha::sha1(&cert.issuer_name().to_der()?));
    Ok(IssuerHashes {
        key_hash,
        name_hash,
    })
}
