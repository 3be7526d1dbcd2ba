use crate::client::AcmeClient;
use crate::export;
use crate::storage::CertStore;
use crate::types::{AcmeError, AcmeResult, CertificateBundle};
use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use tracing::{debug, info, warn};

/// What a lifecycle pass should do for the primary domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No usable certificate: none cached, unparsable, or already expired.
    Issue,
    /// Certificate is valid but expires within the renewal window.
    Renew,
    /// Certificate is valid well beyond the renewal window.
    Noop,
}

/// Expiry of the leaf certificate in the bundle's PEM chain.
pub fn leaf_expiry(bundle: &CertificateBundle) -> AcmeResult<DateTime<Utc>> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(&bundle.certificate)
        .map_err(|e| AcmeError::CertificateParse(format!("failed to parse PEM: {}", e)))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| AcmeError::CertificateParse(format!("failed to parse certificate: {}", e)))?;

    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| AcmeError::CertificateParse("invalid expiry timestamp".into()))
}

/// Decide between issue, renew and no-op for a cached bundle.
///
/// An unparsable cached certificate is treated like an absent one: the
/// fail-safe direction is re-issuance, not blocking the daemon.
pub fn decide(
    bundle: Option<&CertificateBundle>,
    renew_before: Duration,
    now: DateTime<Utc>,
) -> Decision {
    let Some(bundle) = bundle else {
        return Decision::Issue;
    };
    let expiry = match leaf_expiry(bundle) {
        Ok(expiry) => expiry,
        Err(e) => {
            warn!(domain = %bundle.domain, error = %e, "cached certificate unreadable, re-issuing");
            return Decision::Issue;
        }
    };
    if expiry <= now {
        Decision::Issue
    } else if expiry - now <= renew_before {
        Decision::Renew
    } else {
        Decision::Noop
    }
}

/// One lifecycle pass for the primary domain: load the cached bundle,
/// decide, execute against the ACME client, persist, export.
///
/// The cache is only written after a complete successful response, so a
/// failed issue/renew leaves the prior valid entry intact. Returns the
/// fresh bundle when one was obtained.
pub async fn run_pass<C: AcmeClient>(
    client: &C,
    store: &CertStore,
    data_dir: &Path,
    domains: &[String],
    renew_before: Duration,
) -> AcmeResult<Option<CertificateBundle>> {
    let primary = domains
        .first()
        .ok_or_else(|| AcmeError::Config("no domains configured".into()))?;

    let cached = match store.load_cert(primary) {
        Ok(bundle) => Some(bundle),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let fresh = match decide(cached.as_ref(), renew_before, Utc::now()) {
        Decision::Noop => {
            debug!(domain = %primary, "certificate still valid, nothing to do");
            return Ok(None);
        }
        Decision::Issue => {
            info!(domain = %primary, "issuing new certificate");
            client.obtain(domains, true).await?
        }
        Decision::Renew => {
            // decide only returns Renew when a bundle was cached
            let prior = cached
                .ok_or_else(|| AcmeError::Protocol("renewal without cached bundle".into()))?;
            info!(domain = %primary, "renewing certificate");
            client.renew(&prior, true, true).await?
        }
    };

    store.save_cert(&fresh)?;
    export::export(data_dir, &fresh)?;
    Ok(Some(fresh))
}
