//! PKCS#10 requests: decoding device CSRs and producing CA CSRs.

use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::{X509Name, X509Req, X509ReqBuilder};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, ParsedCriAttribute, X509CertificationRequest};

use super::certificate::{carried_extensions, ip_from_bytes, RawExtension, SubjectAltNames};
use super::digest::SignatureAlgorithm;
use super::keys::backend_for_key;
use super::subject::Subject;
use crate::error::{PkiError, PkiResult};

fn malformed(err: impl std::fmt::Display) -> PkiError {
    PkiError::Validation(format!("malformed CSR: {}", err))
}

/// A verified certification request.
pub struct ParsedCsr {
    pub der: Vec<u8>,
    pub public_key: PKey<Public>,
    pub subject: Subject,
    pub alt_names: SubjectAltNames,
    pub extensions: Vec<RawExtension>,
    pub challenge_password: Option<String>,
}

impl std::fmt::Debug for ParsedCsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedCsr")
            .field("subject", &self.subject)
            .field("alt_names", &self.alt_names)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl ParsedCsr {
    pub fn from_pem(pem: &str) -> PkiResult<ParsedCsr> {
        let req = X509Req::from_pem(pem.as_bytes()).map_err(malformed)?;
        ParsedCsr::from_der(&req.to_der()?)
    }

    pub fn from_der(der: &[u8]) -> PkiResult<ParsedCsr> {
        let req = X509Req::from_der(der).map_err(malformed)?;
        let public_key = req.public_key().map_err(malformed)?;
        if !req.verify(&public_key).map_err(malformed)? {
            return Err(PkiError::validation("CSR signature does not verify"));
        }
        let subject = Subject::from_x509_name(req.subject_name())?;

        let (_, parsed) = X509CertificationRequest::from_der(der).map_err(malformed)?;
        let mut alt_names = SubjectAltNames::default();
        let mut extensions = Vec::new();
        let mut challenge_password = None;

        for attribute in parsed.certification_request_info.iter_attributes() {
            match attribute.parsed_attribute() {
                ParsedCriAttribute::ChallengePassword(password) => {
                    challenge_password = Some(password.0.clone());
                }
                ParsedCriAttribute::ExtensionRequest(request) => {
                    for ext in &request.extensions {
                        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension()
                        {
                            for name in &san.general_names {
                                match name {
                                    GeneralName::DNSName(dns) => alt_names.dns.push(dns.to_string()),
                                    GeneralName::RFC822Name(mail) => {
                                        alt_names.emails.push(mail.to_string())
                                    }
                                    GeneralName::URI(uri) => alt_names.uris.push(uri.to_string()),
                                    GeneralName::IPAddress(bytes) => {
                                        if let Some(ip) = ip_from_bytes(bytes) {
                                            alt_names.ips.push(ip);
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        extensions.push(RawExtension {
                            oid: ext.oid.to_id_string(),
                            critical: ext.critical,
                            value: ext.value.to_vec(),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(ParsedCsr {
            der: der.to_vec(),
            public_key,
            subject,
            alt_names,
            extensions,
            challenge_password,
        })
    }

    /// Requested extensions to carry into the certificate. `overridden`
    /// lists OIDs the signing profile supplies itself.
    pub fn carried_extensions(&self, overridden: &[&str]) -> Vec<RawExtension> {
        carried_extensions(&self.extensions, overridden)
    }
}

/// Builds a CSR for an existing key, e.g. a CA enrolling with an upstream authority.
pub fn build_request(
    subject: &X509Name,
    key: &PKeyRef<Private>,
    algorithm: SignatureAlgorithm,
) -> PkiResult<X509Req> {
    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(0)?;
    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;
    backend_for_key(key)?.sign_request(&mut builder, key, algorithm)?;
    Ok(builder.build())
}
