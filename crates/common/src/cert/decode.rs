use serde_json::Value;

use crate::backend::Secret;

use super::CertError;

/// Leaf certificate and CA bundle returned by a sign endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    pub certificate: String,
    /// Newline-joined chain, or the single issuing CA
    pub ca_bundle: String,
}

impl SignedCertificate {
    /// Decode a sign response
    ///
    /// Newer backends answer with a `ca_chain` list, older ones with a
    ///  single `issuing_ca`. A non-empty chain wins.
    pub fn from_secret(secret: &Secret) -> Result<Self, CertError> {
        let certificate = match secret.field("certificate") {
            Some(Value::String(certificate)) if !certificate.is_empty() => certificate.clone(),
            Some(_) => {
                return Err(CertError::Malformed(
                    "field 'certificate' is not a non-empty string".to_string(),
                ))
            }
            None => {
                return Err(CertError::Malformed(
                    "no field 'certificate' in response".to_string(),
                ))
            }
        };

        let ca_bundle = match chain(secret)? {
            Some(bundle) => bundle,
            None => match secret.field("issuing_ca") {
                Some(Value::String(ca)) => ca.clone(),
                Some(_) => {
                    return Err(CertError::Malformed(
                        "field 'issuing_ca' is not a string".to_string(),
                    ))
                }
                None => {
                    return Err(CertError::Malformed(
                        "neither 'ca_chain' nor 'issuing_ca' in response".to_string(),
                    ))
                }
            },
        };

        Ok(Self {
            certificate,
            ca_bundle,
        })
    }
}

fn chain(secret: &Secret) -> Result<Option<String>, CertError> {
    let entries = match secret.field("ca_chain") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(CertError::Malformed(
                "field 'ca_chain' is not a list".to_string(),
            ))
        }
    };
    if entries.is_empty() {
        return Ok(None);
    }

    let certs = entries
        .iter()
        .map(|entry| {
            entry.as_str().ok_or_else(|| {
                CertError::Malformed("field 'ca_chain' holds a non-string entry".to_string())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(certs.join("\n")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::SecretData;

    fn secret(value: Value) -> Secret {
        let data: SecretData = serde_json::from_value(value).unwrap();
        Secret::from_data(data)
    }

    #[test]
    fn test_ca_chain_is_joined_in_order() {
        let signed = SignedCertificate::from_secret(&secret(json!({
            "certificate": "cert",
            "ca_chain": ["cacert1", "cacert2"],
            "issuing_ca": "ignored",
        })))
        .unwrap();
        assert_eq!(signed.certificate, "cert");
        assert_eq!(signed.ca_bundle, "cacert1\ncacert2");
    }

    #[test]
    fn test_issuing_ca_fallback() {
        let signed = SignedCertificate::from_secret(&secret(json!({
            "certificate": "cert",
            "issuing_ca": "cacert",
        })))
        .unwrap();
        assert_eq!(signed.ca_bundle, "cacert");

        let signed = SignedCertificate::from_secret(&secret(json!({
            "certificate": "cert",
            "ca_chain": [],
            "issuing_ca": "cacert",
        })))
        .unwrap();
        assert_eq!(signed.ca_bundle, "cacert");
    }

    #[test]
    fn test_missing_certificate_is_malformed() {
        let err = SignedCertificate::from_secret(&secret(json!({ "issuing_ca": "cacert" })))
            .unwrap_err();
        assert!(matches!(err, CertError::Malformed(_)));

        let err = SignedCertificate::from_secret(&secret(json!({
            "certificate": 7,
            "issuing_ca": "cacert",
        })))
        .unwrap_err();
        assert!(matches!(err, CertError::Malformed(_)));
    }

    #[test]
    fn test_bad_chain_entries_are_malformed() {
        let err = SignedCertificate::from_secret(&secret(json!({
            "certificate": "cert",
            "ca_chain": ["cacert1", 2],
        })))
        .unwrap_err();
        assert!(matches!(err, CertError::Malformed(_)));
    }
}
