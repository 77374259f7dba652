//! Distinguished names built from profile defaults and request overrides.

use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameBuilder, X509NameRef};
use serde::{Deserialize, Serialize};
use temps_entities::{pki_cas, pki_certs, pki_profiles};

use crate::error::{PkiError, PkiResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectAttributes {
    pub organisation: Option<String>,
    pub organisational_unit: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn pick(overriding: &Option<String>, default: &Option<String>) -> Option<String> {
    non_empty(overriding).or_else(|| non_empty(default))
}

impl SubjectAttributes {
    /// Request values win when non-empty, otherwise the defaults apply.
    pub fn merged_over(&self, defaults: &SubjectAttributes) -> SubjectAttributes {
        SubjectAttributes {
            organisation: pick(&self.organisation, &defaults.organisation),
            organisational_unit: pick(&self.organisational_unit, &defaults.organisational_unit),
            country: pick(&self.country, &defaults.country),
            state: pick(&self.state, &defaults.state),
            locality: pick(&self.locality, &defaults.locality),
            street_address: pick(&self.street_address, &defaults.street_address),
            postal_code: pick(&self.postal_code, &defaults.postal_code),
        }
    }

    pub fn validate(&self) -> PkiResult<()> {
        if let Some(country) = non_empty(&self.country) {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(PkiError::Validation(format!(
                    "country must be a two letter code: {}",
                    country
                )));
            }
        }
        Ok(())
    }
}

impl From<&pki_profiles::Model> for SubjectAttributes {
    fn from(profile: &pki_profiles::Model) -> Self {
        SubjectAttributes {
            organisation: profile.organisation.clone(),
            organisational_unit: profile.organisational_unit.clone(),
            country: profile.country.clone(),
            state: profile.state.clone(),
            locality: profile.locality.clone(),
            street_address: profile.street_address.clone(),
            postal_code: profile.postal_code.clone(),
        }
    }
}

impl From<&pki_cas::Model> for SubjectAttributes {
    fn from(ca: &pki_cas::Model) -> Self {
        SubjectAttributes {
            organisation: ca.organisation.clone(),
            organisational_unit: ca.organisational_unit.clone(),
            country: ca.country.clone(),
            state: ca.state.clone(),
            locality: ca.locality.clone(),
            street_address: ca.street_address.clone(),
            postal_code: ca.postal_code.clone(),
        }
    }
}

impl From<&pki_certs::Model> for SubjectAttributes {
    fn from(cert: &pki_certs::Model) -> Self {
        SubjectAttributes {
            organisation: cert.organisation.clone(),
            organisational_unit: cert.organisational_unit.clone(),
            country: cert.country.clone(),
            state: cert.state.clone(),
            locality: cert.locality.clone(),
            street_address: cert.street_address.clone(),
            postal_code: cert.postal_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub common_name: String,
    pub attributes: SubjectAttributes,
}

impl Subject {
    /// The common name always comes from the request, never from defaults.
    pub fn build(
        common_name: &str,
        overrides: &SubjectAttributes,
        defaults: &SubjectAttributes,
    ) -> PkiResult<Subject> {
        let common_name = common_name.trim();
        if common_name.is_empty() {
            return Err(PkiError::validation("common name is required"));
        }
        let attributes = overrides.merged_over(defaults);
        attributes.validate()?;
        Ok(Subject {
            common_name: common_name.to_string(),
            attributes,
        })
    }

    /// Ordered entries, most significant first.
    fn entries(&self) -> Vec<(Nid, &'static str, &str)> {
        let a = &self.attributes;
        let optional = [
            (Nid::COUNTRYNAME, "C", &a.country),
            (Nid::ORGANIZATIONNAME, "O", &a.organisation),
            (Nid::ORGANIZATIONALUNITNAME, "OU", &a.organisational_unit),
            (Nid::LOCALITYNAME, "L", &a.locality),
            (Nid::STATEORPROVINCENAME, "ST", &a.state),
            (Nid::STREETADDRESS, "STREET", &a.street_address),
            (Nid::POSTALCODE, "POSTALCODE", &a.postal_code),
        ];
        let mut entries: Vec<(Nid, &'static str, &str)> = optional
            .into_iter()
            .filter_map(|(nid, label, value)| {
                value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .map(|v| (nid, label, v))
            })
            .collect();
        entries.push((Nid::COMMONNAME, "CN", self.common_name.as_str()));
        entries
    }

    pub fn to_x509_name(&self) -> PkiResult<X509Name> {
        let mut builder = X509NameBuilder::new()?;
        for (nid, _, value) in self.entries() {
            builder.append_entry_by_nid(nid, value)?;
        }
        Ok(builder.build())
    }

    /// RFC 4514 rendering, least significant attribute first. Stored as the
    /// unique subject of an active certificate.
    pub fn dn_string(&self) -> String {
        self.entries()
            .iter()
            .rev()
            .map(|(_, label, value)| format!("{}={}", label, escape_dn_value(value)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Reads the attributes this engine understands from an existing name.
    pub fn from_x509_name(name: &X509NameRef) -> PkiResult<Subject> {
        let read = |nid: Nid| -> PkiResult<Option<String>> {
            match name.entries_by_nid(nid).next() {
                Some(entry) => Ok(Some(entry.data().to_string()?)),
                None => Ok(None),
            }
        };
        let common_name = read(Nid::COMMONNAME)?
            .filter(|cn| !cn.trim().is_empty())
            .ok_or_else(|| PkiError::validation("subject has no common name"))?;
        Ok(Subject {
            common_name,
            attributes: SubjectAttributes {
                organisation: read(Nid::ORGANIZATIONNAME)?,
                organisational_unit: read(Nid::ORGANIZATIONALUNITNAME)?,
                country: read(Nid::COUNTRYNAME)?,
                state: read(Nid::STATEORPROVINCENAME)?,
                locality: read(Nid::LOCALITYNAME)?,
                street_address: read(Nid::STREETADDRESS)?,
                postal_code: read(Nid::POSTALCODE)?,
            },
        })
    }
}

fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == value.chars().count() - 1 && c == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SubjectAttributes {
        SubjectAttributes {
            organisation: Some("Example Inc".to_string()),
            country: Some("CA".to_string()),
            locality: Some("Montreal".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_value_wins_over_default() {
        let overrides = SubjectAttributes {
            organisation: Some("Override Corp".to_string()),
            locality: Some("".to_string()),
            ..Default::default()
        };
        let subject = Subject::build("host.example.com", &overrides, &defaults()).unwrap();

        assert_eq!(subject.attributes.organisation.as_deref(), Some("Override Corp"));
        // empty request value falls back to the default
        assert_eq!(subject.attributes.locality.as_deref(), Some("Montreal"));
        assert_eq!(subject.attributes.state, None);
    }

    #[test]
    fn test_common_name_required() {
        let err = Subject::build("  ", &SubjectAttributes::default(), &defaults()).unwrap_err();
        assert!(matches!(err, PkiError::Validation(_)));
    }

    #[test]
    fn test_dn_string_order_and_escaping() {
        let overrides = SubjectAttributes {
            organisation: Some("Acme, Inc".to_string()),
            ..Default::default()
        };
        let subject = Subject::build("host.example.com", &overrides, &defaults()).unwrap();
        assert_eq!(
            subject.dn_string(),
            "CN=host.example.com,L=Montreal,O=Acme\\, Inc,C=CA"
        );
    }

    #[test]
    fn test_x509_name_roundtrip() {
        let overrides = SubjectAttributes {
            street_address: Some("1 Main St".to_string()),
            postal_code: Some("H0H 0H0".to_string()),
            ..Default::default()
        };
        let subject = Subject::build("device-01", &overrides, &defaults()).unwrap();
        let name = subject.to_x509_name().unwrap();
        let read = Subject::from_x509_name(&name).unwrap();
        assert_eq!(read, subject);
    }

    #[test]
    fn test_bad_country_rejected() {
        let overrides = SubjectAttributes {
            country: Some("Canada".to_string()),
            ..Default::default()
        };
        assert!(Subject::build("host", &overrides, &defaults()).is_err());
    }
}
