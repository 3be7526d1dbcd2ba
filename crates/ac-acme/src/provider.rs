//! DNS-01 challenge providers, selected by name at startup.

use crate::types::{AcmeError, AcmeResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Creates and removes the `_acme-challenge` TXT records a DNS-01
/// validation needs. `present` returns an opaque handle that `cleanup`
/// accepts back.
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    async fn present(&self, fqdn: &str, value: &str) -> AcmeResult<String>;
    async fn cleanup(&self, handle: &str) -> AcmeResult<()>;
}

/// Look up a challenge provider by its configured name. Unknown names are
/// a fatal configuration error.
pub fn provider_by_name(name: &str) -> AcmeResult<Box<dyn ChallengeProvider>> {
    match name {
        "cloudflare" => Ok(Box::new(CloudflareProvider::from_env()?)),
        other => Err(AcmeError::UnknownProvider(other.to_string())),
    }
}

const CF_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: Option<T>,
    errors: Option<Vec<CloudflareApiError>>,
}

#[derive(Debug, Deserialize)]
struct CloudflareApiError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
}

/// TXT record management against the Cloudflare v4 API.
pub struct CloudflareProvider {
    api_token: String,
    zone_id: String,
    client: reqwest::Client,
}

impl CloudflareProvider {
    /// Credentials come from `CLOUDFLARE_API_TOKEN` / `CLOUDFLARE_ZONE_ID`.
    pub fn from_env() -> AcmeResult<Self> {
        let api_token = std::env::var("CLOUDFLARE_API_TOKEN")
            .map_err(|_| AcmeError::Config("CLOUDFLARE_API_TOKEN is not set".into()))?;
        let zone_id = std::env::var("CLOUDFLARE_ZONE_ID")
            .map_err(|_| AcmeError::Config("CLOUDFLARE_ZONE_ID is not set".into()))?;
        Ok(Self::new(api_token, zone_id))
    }

    pub fn new(api_token: String, zone_id: String) -> Self {
        Self {
            api_token,
            zone_id,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChallengeProvider for CloudflareProvider {
    async fn present(&self, fqdn: &str, value: &str) -> AcmeResult<String> {
        let url = format!("{}/zones/{}/dns_records", CF_API_BASE, self.zone_id);

        debug!(fqdn, "creating ACME challenge TXT record in Cloudflare");

        let request = CreateRecordRequest {
            record_type: "TXT",
            name: fqdn,
            content: value,
            ttl: 60,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AcmeError::ChallengeFailed(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        let body: CloudflareResponse<DnsRecord> = resp
            .json()
            .await
            .map_err(|e| AcmeError::ChallengeFailed(format!("failed to parse response: {}", e)))?;

        if !body.success {
            let message = body
                .errors
                .map(|errs| {
                    errs.iter()
                        .map(|e| format!("[{}] {}", e.code, e.message))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(AcmeError::ChallengeFailed(format!(
                "Cloudflare API error: {}",
                message
            )));
        }

        let record_id = body
            .result
            .ok_or_else(|| AcmeError::ChallengeFailed("no result in response".into()))?
            .id;

        info!(fqdn, record_id = %record_id, "created ACME challenge TXT record");
        Ok(record_id)
    }

    async fn cleanup(&self, handle: &str) -> AcmeResult<()> {
        let url = format!(
            "{}/zones/{}/dns_records/{}",
            CF_API_BASE, self.zone_id, handle
        );

        debug!(record_id = handle, "deleting ACME challenge TXT record");

        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| AcmeError::ChallengeFailed(format!("HTTP request failed: {}", e)))?;

        if !resp.status().is_success() {
            warn!(record_id = handle, status = %resp.status(), "failed to delete challenge record");
            return Err(AcmeError::ChallengeFailed(format!(
                "delete failed with status {}",
                resp.status()
            )));
        }

        info!(record_id = handle, "deleted ACME challenge TXT record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_name_is_rejected() {
        let Err(err) = provider_by_name("no-such-provider") else {
            panic!("unknown provider name must not resolve");
        };
        assert!(matches!(err, AcmeError::UnknownProvider(name) if name == "no-such-provider"));
    }
}
