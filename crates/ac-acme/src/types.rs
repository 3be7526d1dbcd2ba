use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcmeError {
    /// Expected absence of a state file. Drives create-vs-load and
    /// issue-vs-renew branching; never a fault.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ACME protocol error: {0}")]
    Protocol(String),

    #[error("ACME challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("unknown challenge provider: {0}")]
    UnknownProvider(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AcmeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AcmeError::NotFound(_))
    }
}

pub type AcmeResult<T> = Result<T, AcmeError>;

/// Persisted ACME account: email, opaque account credentials (the ES256
/// account key plus directory URLs, as serialized by the ACME client) and
/// the registration reference returned by the directory.
///
/// Written once at registration; never field-mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub email: String,
    /// Account URL assigned by the ACME server; absent until registration
    /// has succeeded.
    pub registration: Option<String>,
    /// Opaque credential blob, round-tripped to the ACME client on load.
    pub key: serde_json::Value,
}

/// One issued certificate, keyed by its primary domain.
///
/// Field names and byte encodings match the on-disk JSON format
/// (`<domain>.json`); byte fields are base64 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub domain: String,
    #[serde(rename = "certUrl")]
    pub cert_url: String,
    #[serde(rename = "certStableUrl")]
    pub cert_stable_url: String,
    #[serde(rename = "privateKey", with = "base64_bytes")]
    pub private_key: Vec<u8>,
    /// PEM chain: leaf first, then intermediates.
    #[serde(with = "base64_bytes")]
    pub certificate: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub issuer_certificate: Vec<u8>,
    /// DER-encoded CSR the order was finalized with.
    #[serde(with = "base64_bytes")]
    pub csr: Vec<u8>,
}

/// Serialize byte fields as base64 strings inside JSON state files.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_json_field_names() {
        let bundle = CertificateBundle {
            domain: "example.com".into(),
            cert_url: "https://acme/cert/1".into(),
            cert_stable_url: "https://acme/cert/1".into(),
            private_key: b"KEY".to_vec(),
            certificate: b"CERT".to_vec(),
            issuer_certificate: Vec::new(),
            csr: Vec::new(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&bundle).unwrap()).unwrap();
        assert_eq!(json["certUrl"], "https://acme/cert/1");
        assert_eq!(json["certStableUrl"], "https://acme/cert/1");
        // Byte fields serialize as base64 strings
        assert_eq!(json["privateKey"], "S0VZ");
        assert_eq!(json["certificate"], "Q0VSVA==");

        let back: CertificateBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        let err = AcmeError::NotFound(PathBuf::from("/tmp/x.json"));
        assert!(err.is_not_found());
        let err: AcmeError = std::io::Error::other("disk on fire").into();
        assert!(!err.is_not_found());
    }
}
