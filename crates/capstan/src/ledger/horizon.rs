//! The ledger RPC service, treated as a black box: it loads account
//! sequence numbers and accepts signed envelopes for submission.

use crate::{config::CapstanConfig, errors::CapstanError};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LedgerAccount {
    pub id: String,
    pub sequence: i64,
}

#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub hash: String,
}

pub trait HorizonClient {
    fn server_url(&self) -> &str;
    fn network_passphrase(&self) -> &str;
    fn network_label(&self) -> &str;

    fn load_account(
        &self,
        account_id: &str,
    ) -> impl std::future::Future<Output = Result<LedgerAccount, CapstanError>> + Send;

    fn submit_transaction(
        &self,
        envelope_b64: &str,
    ) -> impl std::future::Future<Output = Result<SubmitResult, CapstanError>> + Send;
}

/// Network resolution for a request: a registered name maps to its
/// passphrase and default horizon; anything else is treated as a custom
/// passphrase and must carry an explicit `horizon` parameter.
#[derive(Debug, Clone)]
pub struct ResolvedNetwork {
    pub label: String,
    pub passphrase: String,
    pub horizon: String,
}

pub fn resolve_network(
    cfg: &CapstanConfig,
    network: Option<&str>,
    horizon: Option<&str>,
) -> Result<ResolvedNetwork, CapstanError> {
    let label = network.unwrap_or("public");
    if let Some(settings) = cfg.network(label) {
        return Ok(ResolvedNetwork {
            label: label.trim().to_lowercase(),
            passphrase: settings.passphrase.clone(),
            horizon: horizon.unwrap_or(&settings.horizon).to_owned(),
        });
    }
    let horizon = horizon.ok_or(CapstanError::HorizonRequired)?;
    Ok(ResolvedNetwork {
        label: label.to_owned(),
        passphrase: label.to_owned(),
        horizon: horizon.to_owned(),
    })
}

#[derive(Debug, Clone)]
pub struct HorizonRpc {
    http: reqwest::Client,
    network: ResolvedNetwork,
}

impl HorizonRpc {
    pub const fn new(http: reqwest::Client, network: ResolvedNetwork) -> Self {
        Self { http, network }
    }

    fn accounts_url(&self, account_id: &str) -> String {
        format!(
            "{}/accounts/{}",
            self.network.horizon.trim_end_matches('/'),
            urlencoding::encode(account_id)
        )
    }

    fn transactions_url(&self) -> String {
        format!("{}/transactions", self.network.horizon.trim_end_matches('/'))
    }

    async fn error_from_response(&self, resp: reqwest::Response) -> CapstanError {
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return CapstanError::AccountNotFound(self.network.label.clone());
        }
        // Forward the RPC error body verbatim for caller-side diagnostics.
        let details = resp
            .json::<Value>()
            .await
            .unwrap_or(Value::Null);
        CapstanError::TransactionFailed { details }
    }
}

impl HorizonClient for HorizonRpc {
    fn server_url(&self) -> &str {
        &self.network.horizon
    }

    fn network_passphrase(&self) -> &str {
        &self.network.passphrase
    }

    fn network_label(&self) -> &str {
        &self.network.label
    }

    async fn load_account(&self, account_id: &str) -> Result<LedgerAccount, CapstanError> {
        let url = self.accounts_url(account_id);
        debug!(url, "loading ledger account");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|_e| CapstanError::NetworkError)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|_e| CapstanError::NetworkError)?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(account_id)
            .to_owned();
        // Horizon serves sequence numbers as strings; tolerate numbers too.
        let sequence = match body.get("sequence") {
            Some(Value::String(s)) => s.parse().map_err(|_e| CapstanError::NetworkError)?,
            Some(Value::Number(n)) => n.as_i64().ok_or(CapstanError::NetworkError)?,
            _ => return Err(CapstanError::NetworkError),
        };
        Ok(LedgerAccount { id, sequence })
    }

    async fn submit_transaction(&self, envelope_b64: &str) -> Result<SubmitResult, CapstanError> {
        let url = self.transactions_url();
        debug!(url, "submitting transaction envelope");
        let resp = self
            .http
            .post(&url)
            .form(&[("tx", envelope_b64)])
            .send()
            .await
            .map_err(|_e| CapstanError::NetworkError)?;
        if !resp.status().is_success() {
            return Err(self.error_from_response(resp).await);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|_e| CapstanError::NetworkError)?;
        let hash = body
            .get("hash")
            .and_then(Value::as_str)
            .ok_or(CapstanError::NetworkError)?
            .to_owned();
        Ok(SubmitResult { hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_networks_resolve_with_default_horizon() -> Result<(), CapstanError> {
        let cfg = CapstanConfig::default();
        let net = resolve_network(&cfg, None, None)?;
        assert_eq!(net.label, "public");
        assert_eq!(net.horizon, crate::config::PUBLIC_HORIZON_URL);

        let net = resolve_network(&cfg, Some("testnet"), Some("http://localhost:8000"))?;
        assert_eq!(net.horizon, "http://localhost:8000");
        assert_eq!(net.passphrase, crate::config::TESTNET_NETWORK_PASSPHRASE);
        Ok(())
    }

    #[test]
    fn custom_network_requires_horizon() {
        let cfg = CapstanConfig::default();
        let err = resolve_network(&cfg, Some("My Private Net ; 2026"), None);
        assert!(matches!(err, Err(CapstanError::HorizonRequired)));

        let ok = resolve_network(&cfg, Some("My Private Net ; 2026"), Some("http://localhost:8000"));
        assert!(ok.is_ok_and(|n| n.passphrase == "My Private Net ; 2026"));
    }
}
