//! Caller-side SDK: the interface a relying application embeds.
//!
//! Validation runs against the intent registry before any surface opens, so
//! malformed requests fail synchronously and cheaply. Responses come back
//! through the broker and are filtered down to the intent's declared return
//! fields before the caller sees them.

use crate::{
    broker::{Broker, IntentRequest, PendingIntent},
    errors::{CapstanError, ErrorPayload},
    intents, strkey,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tracing::warn;

/// Options every intent accepts alongside its own params.
#[derive(Debug, Clone, Default)]
pub struct IntentOptions {
    /// Network name or custom passphrase.
    pub network: Option<String>,
    /// Horizon URL override (required for custom networks).
    pub horizon: Option<String>,
    /// Return the signed envelope instead of submitting it.
    pub prepare: bool,
    /// Requested account public key.
    pub pubkey: Option<String>,
    /// Ask the confirmation surface to provision the demo account.
    pub demo_mode: bool,
}

impl IntentOptions {
    fn apply(&self, params: &mut BTreeMap<String, String>) {
        if let Some(network) = &self.network {
            params.insert("network".to_owned(), network.clone());
        }
        if let Some(horizon) = &self.horizon {
            params.insert("horizon".to_owned(), horizon.clone());
        }
        if self.prepare {
            params.insert("prepare".to_owned(), "true".to_owned());
        }
        if let Some(pubkey) = &self.pubkey {
            params.insert("pubkey".to_owned(), pubkey.clone());
        }
        if self.demo_mode {
            params.insert("demo_mode".to_owned(), "true".to_owned());
        }
    }
}

/// Payment request parameters.
#[derive(Debug, Clone)]
pub struct PayRequest {
    pub destination: String,
    pub amount: String,
    pub asset_code: Option<String>,
    pub asset_issuer: Option<String>,
    pub memo: Option<String>,
    pub memo_type: Option<String>,
}

pub struct IntentClient {
    app_name: String,
    app_description: String,
    broker: Arc<Broker>,
}

impl IntentClient {
    pub fn new(broker: Arc<Broker>, app_name: &str, app_description: Option<&str>) -> Self {
        if app_name.is_empty() {
            warn!("parameter \"app_name\" is required");
        }
        Self {
            app_name: if app_name.is_empty() {
                "Unknown Application".to_owned()
            } else {
                app_name.to_owned()
            },
            app_description: app_description
                .map_or_else(|| "No description".to_owned(), ToOwned::to_owned),
            broker,
        }
    }

    /// A unique challenge value for `authenticate` flows.
    pub fn generate_authentication_token() -> String {
        let mut bytes = [0_u8; 16];
        crate::vault::crypto::fill_random(&mut bytes);
        hex::encode(bytes)
    }

    /// Validate and dispatch an intent request, then await and filter the
    /// response. The error side mirrors the wire payload `{message, code}`.
    pub async fn request(
        &self,
        intent: &str,
        params: &BTreeMap<String, String>,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let pending = self.dispatch(intent, params, options)?;
        let raw = pending.wait().await?;
        Ok(intents::filter_return(intent, &raw))
    }

    fn dispatch(
        &self,
        intent: &str,
        params: &BTreeMap<String, String>,
        options: &IntentOptions,
    ) -> Result<PendingIntent, ErrorPayload> {
        if intent.is_empty() {
            return Err(CapstanError::IntentRequired.into());
        }
        if let Some(pubkey) = params.get("pubkey").or(options.pubkey.as_ref()) {
            if !strkey::is_valid_public_key(pubkey) {
                return Err(CapstanError::InvalidPublicKeyParam("pubkey".into()).into());
            }
        }
        let descriptor = intents::validate(intent, params)?;

        // Only declared params travel; unknown extras are dropped here.
        let mut request_params = BTreeMap::new();
        for &key in descriptor.required.iter().chain(descriptor.optional) {
            if let Some(v) = params.get(key) {
                if !v.is_empty() {
                    request_params.insert(key.to_owned(), v.clone());
                }
            }
        }
        options.apply(&mut request_params);

        let request = IntentRequest {
            intent: intent.to_owned(),
            params: request_params,
            app_name: self.app_name.clone(),
            app_description: self.app_description.clone(),
        };
        Ok(self.broker.open(&request)?)
    }

    /// Request the account public key (unverified authentication).
    pub async fn request_public_key(&self) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        self.request("public_key", &BTreeMap::new(), &IntentOptions::default())
            .await
    }

    /// Request basic user info (email, avatar).
    pub async fn request_basic_info(&self) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        self.request("basic_info", &BTreeMap::new(), &IntentOptions::default())
            .await
    }

    /// Verified third-party authentication: the surface signs the caller's
    /// challenge token with the user's account key.
    pub async fn authenticate(
        &self,
        nonce: &str,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert(
            "token".to_owned(),
            format!("{nonce}{}", Self::generate_authentication_token()),
        );
        self.request("authenticate", &params, options).await
    }

    /// Request signing of a transaction envelope (base64).
    pub async fn sign_transaction(
        &self,
        xdr: &str,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("xdr".to_owned(), xdr.to_owned());
        self.request("tx", &params, options).await
    }

    /// Request arbitrary message signing.
    pub async fn sign_message(
        &self,
        message: &str,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("message".to_owned(), message.to_owned());
        self.request("sign_msg", &params, options).await
    }

    /// Request verification of a signature produced by `sign_message`.
    pub async fn verify_message(
        &self,
        message: &str,
        message_signature: &str,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("message".to_owned(), message.to_owned());
        params.insert("message_signature".to_owned(), message_signature.to_owned());
        self.request("verify_msg", &params, options).await
    }

    /// Request a payment.
    pub async fn pay(
        &self,
        pay: &PayRequest,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("destination".to_owned(), pay.destination.clone());
        params.insert("amount".to_owned(), pay.amount.clone());
        for (key, value) in [
            ("asset_code", &pay.asset_code),
            ("asset_issuer", &pay.asset_issuer),
            ("memo", &pay.memo),
            ("memo_type", &pay.memo_type),
        ] {
            if let Some(v) = value {
                params.insert(key.to_owned(), v.clone());
            }
        }
        self.request("pay", &params, options).await
    }

    /// Request an asset trustline creation.
    pub async fn trust(
        &self,
        asset_code: &str,
        asset_issuer: &str,
        limit: Option<&str>,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("asset_code".to_owned(), asset_code.to_owned());
        params.insert("asset_issuer".to_owned(), asset_issuer.to_owned());
        if let Some(limit) = limit {
            params.insert("limit".to_owned(), limit.to_owned());
        }
        self.request("trust", &params, options).await
    }

    /// Request inflation pool voting.
    pub async fn inflation_vote(
        &self,
        destination: &str,
        options: &IntentOptions,
    ) -> Result<BTreeMap<String, Value>, ErrorPayload> {
        let mut params = BTreeMap::new();
        params.insert("destination".to_owned(), destination.to_owned());
        self.request("inflation_vote", &params, options).await
    }
}
