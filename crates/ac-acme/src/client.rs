use crate::dns;
use crate::provider::ChallengeProvider;
use crate::types::{AccountRecord, AcmeError, AcmeResult, CertificateBundle};
use ac_common::Directory;
use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Let's Encrypt production directory URL
const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Attempts (5s apart) to wait for order validation
const ORDER_POLL_ATTEMPTS: u32 = 60;
/// Attempts (2s apart) to wait for the signed certificate
const CERT_POLL_ATTEMPTS: u32 = 30;

/// Capability surface of an ACME directory, substitutable by a scripted
/// test double. The production implementation is [`DirectoryClient`].
#[async_trait]
pub trait AcmeClient {
    /// Register a fresh account and bind the client to it.
    async fn register(&self, email: &str, terms_agreed: bool) -> AcmeResult<AccountRecord>;

    /// Bind the client to previously persisted account credentials.
    /// Performs no network calls.
    async fn bind(&self, record: &AccountRecord) -> AcmeResult<()>;

    /// Obtain a certificate for `domains` (first entry is the primary).
    async fn obtain(&self, domains: &[String], bundle: bool) -> AcmeResult<CertificateBundle>;

    /// Renew a previously obtained certificate, reusing its private key
    /// when `reuse_key` is set.
    async fn renew(
        &self,
        prior: &CertificateBundle,
        bundle: bool,
        reuse_key: bool,
    ) -> AcmeResult<CertificateBundle>;
}

/// Production ACME client wrapping `instant-acme` with DNS-01 challenges
/// solved through a [`ChallengeProvider`].
pub struct DirectoryClient {
    directory_url: String,
    provider: Box<dyn ChallengeProvider>,
    resolvers: Vec<String>,
    dns_timeout: Duration,
    account: Mutex<Option<Account>>,
}

impl DirectoryClient {
    pub fn new(
        directory: Directory,
        provider: Box<dyn ChallengeProvider>,
        resolvers: Vec<String>,
        dns_timeout: Duration,
    ) -> Self {
        let directory_url = match directory {
            Directory::Production => LETSENCRYPT_PRODUCTION,
            Directory::Staging => LETSENCRYPT_STAGING,
        };
        Self {
            directory_url: directory_url.to_string(),
            provider,
            resolvers,
            dns_timeout,
            account: Mutex::new(None),
        }
    }

    /// Present a TXT record for every pending authorization and tell the
    /// server to validate, then poll until the order is ready. Returns the
    /// provider handles of the records it created; the caller cleans up.
    async fn validate_order(
        &self,
        order: &mut Order,
        records: &mut Vec<(String, String)>,
    ) -> AcmeResult<()> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to get authorizations: {}", e)))?;

        for auth in authorizations {
            if auth.status == AuthorizationStatus::Valid {
                debug!("authorization already valid, skipping");
                continue;
            }

            let challenge = auth
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| {
                    AcmeError::ChallengeFailed("no DNS-01 challenge available".into())
                })?;

            let domain = match &auth.identifier {
                Identifier::Dns(d) => d.clone(),
            };

            // The challenge record sits on the base name, wildcard stripped
            let fqdn = format!("_acme-challenge.{}", domain.trim_start_matches("*."));
            let value = order.key_authorization(challenge).dns_value();

            debug!(fqdn = %fqdn, "setting up DNS-01 challenge");
            let handle = self.provider.present(&fqdn, &value).await?;
            records.push((fqdn.clone(), handle));

            if !dns::wait_for_txt(&self.resolvers, &fqdn, &value, self.dns_timeout).await {
                warn!(fqdn = %fqdn, "TXT record not visible before timeout, proceeding anyway");
            }

            order.set_challenge_ready(&challenge.url).await.map_err(|e| {
                AcmeError::Protocol(format!("failed to set challenge ready: {}", e))
            })?;
        }

        info!("waiting for ACME order validation");
        let mut attempts = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            order
                .refresh()
                .await
                .map_err(|e| AcmeError::Protocol(format!("failed to refresh order: {}", e)))?;

            match order.state().status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::ChallengeFailed(
                        "order validation failed, order became invalid".into(),
                    ));
                }
                status => {
                    debug!(status = ?status, attempt = attempts, "order not ready yet");
                    attempts += 1;
                    if attempts > ORDER_POLL_ATTEMPTS {
                        return Err(AcmeError::ChallengeFailed(
                            "timeout waiting for order validation".into(),
                        ));
                    }
                }
            }
        }
    }

    async fn cleanup_records(&self, records: &[(String, String)]) {
        for (fqdn, handle) in records {
            if let Err(e) = self.provider.cleanup(handle).await {
                warn!(fqdn = %fqdn, error = %e, "failed to clean up challenge record");
            }
        }
    }

    /// Run one full order: validate, finalize with a CSR for `key_pair`,
    /// fetch the signed chain.
    async fn order_certificate(
        &self,
        domains: &[String],
        key_pair: rcgen::KeyPair,
        bundle: bool,
    ) -> AcmeResult<CertificateBundle> {
        let account_guard = self.account.lock().await;
        let account = account_guard
            .as_ref()
            .ok_or_else(|| AcmeError::Protocol("client has no bound account".into()))?;

        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();

        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to create order: {}", e)))?;

        let mut records = Vec::new();
        let validated = self.validate_order(&mut order, &mut records).await;
        // Records are only needed until validation; drop them on both paths
        self.cleanup_records(&records).await;
        validated?;

        let mut params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| AcmeError::Protocol(format!("failed to create cert params: {}", e)))?;
        params.distinguished_name = rcgen::DistinguishedName::new();

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::Protocol(format!("failed to create CSR: {}", e)))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to finalize order: {}", e)))?;

        info!("waiting for certificate");
        let mut attempts = 0;
        let chain = loop {
            tokio::time::sleep(Duration::from_secs(2)).await;
            match order.certificate().await {
                Ok(Some(chain)) => break chain,
                Ok(None) => {
                    debug!("certificate not ready yet");
                    attempts += 1;
                    if attempts > CERT_POLL_ATTEMPTS {
                        return Err(AcmeError::Protocol(
                            "timeout waiting for signed certificate".into(),
                        ));
                    }
                }
                Err(e) => {
                    return Err(AcmeError::Protocol(format!(
                        "failed to fetch certificate: {}",
                        e
                    )));
                }
            }
        };

        let cert_url = order.state().certificate.clone().unwrap_or_default();
        let (leaf, issuer) = split_chain(&chain);
        let certificate = if bundle { chain.clone() } else { leaf };

        Ok(CertificateBundle {
            domain: domains[0].clone(),
            cert_stable_url: cert_url.clone(),
            cert_url,
            private_key: key_pair.serialize_pem().into_bytes(),
            certificate: certificate.into_bytes(),
            issuer_certificate: issuer.into_bytes(),
            csr: csr.der().to_vec(),
        })
    }
}

#[async_trait]
impl AcmeClient for DirectoryClient {
    async fn register(&self, email: &str, terms_agreed: bool) -> AcmeResult<AccountRecord> {
        info!(email = %email, "registering new ACME account");

        let contact = format!("mailto:{}", email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: terms_agreed,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::Protocol(format!("account registration failed: {}", e)))?;

        let key = serde_json::to_value(&credentials)?;
        // The credential blob carries the account URL the server assigned
        let registration = key
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        *self.account.lock().await = Some(account);
        Ok(AccountRecord {
            email: email.to_string(),
            registration,
            key,
        })
    }

    async fn bind(&self, record: &AccountRecord) -> AcmeResult<()> {
        let credentials: AccountCredentials = serde_json::from_value(record.key.clone())?;
        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to load account: {}", e)))?;
        *self.account.lock().await = Some(account);
        debug!(email = %record.email, "bound to saved ACME account");
        Ok(())
    }

    async fn obtain(&self, domains: &[String], bundle: bool) -> AcmeResult<CertificateBundle> {
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| AcmeError::Protocol(format!("failed to generate key pair: {}", e)))?;
        self.order_certificate(domains, key_pair, bundle).await
    }

    async fn renew(
        &self,
        prior: &CertificateBundle,
        bundle: bool,
        reuse_key: bool,
    ) -> AcmeResult<CertificateBundle> {
        let key_pair = if reuse_key {
            let pem = std::str::from_utf8(&prior.private_key)
                .map_err(|e| AcmeError::CertificateParse(format!("private key not UTF-8: {}", e)))?;
            rcgen::KeyPair::from_pem(pem)
                .map_err(|e| AcmeError::CertificateParse(format!("failed to load key: {}", e)))?
        } else {
            rcgen::KeyPair::generate()
                .map_err(|e| AcmeError::Protocol(format!("failed to generate key pair: {}", e)))?
        };

        // The renewal request covers every SAN the prior certificate carried
        let domains = domains_from_leaf(&prior.certificate, &prior.domain)?;
        self.order_certificate(&domains, key_pair, bundle).await
    }
}

/// Split a PEM chain into the leaf block and the remaining issuer blocks.
fn split_chain(chain: &str) -> (String, String) {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    match chain.match_indices(BEGIN).nth(1) {
        Some((pos, _)) => (chain[..pos].to_string(), chain[pos..].to_string()),
        None => (chain.to_string(), String::new()),
    }
}

/// Extract the DNS SANs from the leaf of a PEM chain, falling back to the
/// primary domain when the certificate carries none.
fn domains_from_leaf(chain_pem: &[u8], primary: &str) -> AcmeResult<Vec<String>> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem)
        .map_err(|e| AcmeError::CertificateParse(format!("failed to parse PEM: {}", e)))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| AcmeError::CertificateParse(format!("failed to parse certificate: {}", e)))?;

    let mut domains = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                domains.push(dns.to_string());
            }
        }
    }
    if domains.is_empty() {
        domains.push(primary.to_string());
    }
    // Keep the primary domain first in the renewal request
    if let Some(pos) = domains.iter().position(|d| d == primary) {
        domains.swap(0, pos);
    }
    Ok(domains)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chain() {
        let leaf = "-----BEGIN CERTIFICATE-----\nAAA\n-----END CERTIFICATE-----\n";
        let issuer = "-----BEGIN CERTIFICATE-----\nBBB\n-----END CERTIFICATE-----\n";
        let chain = format!("{}{}", leaf, issuer);

        let (got_leaf, got_issuer) = split_chain(&chain);
        assert_eq!(got_leaf, leaf);
        assert_eq!(got_issuer, issuer);

        let (only, rest) = split_chain(leaf);
        assert_eq!(only, leaf);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_domains_from_leaf() {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![
            "example.com".to_string(),
            "www.example.com".to_string(),
        ])
        .unwrap();
        let cert = params.self_signed(&key).unwrap();

        let domains = domains_from_leaf(cert.pem().as_bytes(), "example.com").unwrap();
        assert_eq!(domains, vec!["example.com", "www.example.com"]);

        // Primary moves to the front regardless of SAN order
        let domains = domains_from_leaf(cert.pem().as_bytes(), "www.example.com").unwrap();
        assert_eq!(domains[0], "www.example.com");
    }
}
