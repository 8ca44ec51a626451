//! Intent reactions: given a confirmed context and the user's chosen
//! keypair, produce the raw response fields for each supported intent.
//!
//! Local intents (key disclosure, message signing) never touch the network;
//! ledger intents go through the normalizer and the Horizon client.

use super::context::ActionContext;
use crate::{
    amount,
    errors::CapstanError,
    ledger::{
        horizon::HorizonClient,
        normalizer::{self, TxOutcome},
        Asset, Keypair, Operation, TransactionEnvelope,
    },
    vault::Account,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::error;

fn truthy(v: Option<&String>) -> bool {
    v.is_some_and(|s| !s.is_empty() && s != "0" && s != "false")
}

/// Intents that resolve entirely from local key material.
pub fn respond_local(
    ctx: &ActionContext,
    account: &Account,
    keypair: &Keypair,
) -> Result<BTreeMap<String, Value>, CapstanError> {
    let pubkey = keypair.address();
    let mut res = BTreeMap::new();

    match ctx.intent.as_str() {
        "public_key" => {
            res.insert("pubkey".to_owned(), json!(pubkey));
        }
        "basic_info" => {
            res.insert(
                "info".to_owned(),
                json!({
                    "email": account.email,
                    "avatar": account.avatar,
                }),
            );
        }
        "authenticate" => {
            let token = ctx.param("token").ok_or_else(|| CapstanError::MissingParam {
                param: "token".into(),
                intent: ctx.intent.clone(),
            })?;
            let signature = keypair.sign(format!("{pubkey}{token}").as_bytes());
            res.insert("pubkey".to_owned(), json!(pubkey));
            res.insert("token".to_owned(), json!(token));
            res.insert("token_signature".to_owned(), json!(hex::encode(signature)));
        }
        "sign_msg" => {
            let message = ctx.param("message").ok_or_else(|| CapstanError::MissingParam {
                param: "message".into(),
                intent: ctx.intent.clone(),
            })?;
            let signature = keypair.sign(format!("{pubkey}{message}").as_bytes());
            res.insert("pubkey".to_owned(), json!(pubkey));
            res.insert("message".to_owned(), json!(message));
            res.insert("message_signature".to_owned(), json!(hex::encode(signature)));
        }
        "verify_msg" => {
            let message = ctx.param("message").ok_or_else(|| CapstanError::MissingParam {
                param: "message".into(),
                intent: ctx.intent.clone(),
            })?;
            let signature_hex =
                ctx.param("message_signature")
                    .ok_or_else(|| CapstanError::MissingParam {
                        param: "message_signature".into(),
                        intent: ctx.intent.clone(),
                    })?;
            let raw = hex::decode(&signature_hex).map_err(|_e| CapstanError::InvalidData)?;
            if !keypair.verify(format!("{pubkey}{message}").as_bytes(), &raw) {
                return Err(CapstanError::InvalidMessageSignature);
            }
            res.insert("pubkey".to_owned(), json!(pubkey));
            res.insert("message".to_owned(), json!(message));
            res.insert("message_signature".to_owned(), json!(signature_hex));
            res.insert("confirmed".to_owned(), json!(true));
        }
        other => return Err(CapstanError::UnknownIntent(other.to_owned())),
    }

    Ok(res)
}

/// Intents that build, sign and possibly submit a ledger transaction.
pub async fn respond_ledger<H: HorizonClient>(
    ctx: &ActionContext,
    keypair: &Keypair,
    rpc: &H,
    base_fee: u32,
) -> Result<BTreeMap<String, Value>, CapstanError> {
    let prepare = truthy(ctx.data.get("prepare"));
    let has_callback = ctx.data.contains_key("callback");

    let mut res: BTreeMap<String, Value> = BTreeMap::new();

    let outcome = match ctx.intent.as_str() {
        "tx" => {
            let xdr = ctx.param("xdr").ok_or_else(|| CapstanError::MissingParam {
                param: "xdr".into(),
                intent: ctx.intent.clone(),
            })?;
            let envelope = TransactionEnvelope::from_xdr_base64(&xdr)?;
            let envelope = normalizer::normalize_incoming(rpc, envelope, &keypair.address()).await?;
            res.insert("xdr".to_owned(), json!(xdr));
            normalizer::finalize(rpc, envelope, keypair, prepare, has_callback).await?
        }
        "pay" => {
            let destination =
                ctx.param("destination")
                    .ok_or_else(|| CapstanError::MissingParam {
                        param: "destination".into(),
                        intent: ctx.intent.clone(),
                    })?;
            let amount_s = ctx.param("amount").ok_or_else(|| CapstanError::MissingParam {
                param: "amount".into(),
                intent: ctx.intent.clone(),
            })?;
            amount::parse_amount_to_stroops(&amount_s)
                .map_err(|_e| CapstanError::InvalidData)?;

            // No issuer means the native asset.
            let asset = match (ctx.param("asset_code"), ctx.param("asset_issuer")) {
                (Some(code), Some(issuer)) => Asset::issued(code, issuer),
                _ => Asset::Native,
            };
            let memo = ctx.param("memo");
            let memo_type = ctx.param("memo_type");

            for (k, v) in [
                ("amount", Some(amount_s.clone())),
                ("destination", Some(destination.clone())),
                ("asset_code", ctx.param("asset_code")),
                ("asset_issuer", ctx.param("asset_issuer")),
                ("memo", memo.clone()),
                ("memo_type", memo_type.clone()),
            ] {
                if let Some(v) = v {
                    res.insert(k.to_owned(), json!(v));
                }
            }

            let envelope = normalizer::build(
                rpc,
                keypair,
                base_fee,
                vec![Operation::Payment {
                    destination,
                    asset,
                    amount: amount_s,
                }],
                memo.as_deref(),
                memo_type.as_deref(),
            )
            .await?;
            normalizer::finalize(rpc, envelope, keypair, prepare, has_callback).await?
        }
        "trust" => {
            let asset_code =
                ctx.param("asset_code")
                    .ok_or_else(|| CapstanError::MissingParam {
                        param: "asset_code".into(),
                        intent: ctx.intent.clone(),
                    })?;
            let asset_issuer =
                ctx.param("asset_issuer")
                    .ok_or_else(|| CapstanError::MissingParam {
                        param: "asset_issuer".into(),
                        intent: ctx.intent.clone(),
                    })?;
            let limit = ctx
                .param("limit")
                .unwrap_or_else(|| amount::MAX_AMOUNT.to_owned());

            res.insert("asset_code".to_owned(), json!(asset_code));
            res.insert("asset_issuer".to_owned(), json!(asset_issuer));
            res.insert("limit".to_owned(), json!(limit));

            let envelope = normalizer::build(
                rpc,
                keypair,
                base_fee,
                vec![Operation::ChangeTrust {
                    asset: Asset::issued(asset_code, asset_issuer),
                    limit,
                }],
                None,
                None,
            )
            .await?;
            normalizer::finalize(rpc, envelope, keypair, prepare, has_callback).await?
        }
        "inflation_vote" => {
            let destination =
                ctx.param("destination")
                    .ok_or_else(|| CapstanError::MissingParam {
                        param: "destination".into(),
                        intent: ctx.intent.clone(),
                    })?;
            res.insert("destination".to_owned(), json!(destination));

            let envelope = normalizer::build(
                rpc,
                keypair,
                base_fee,
                vec![Operation::SetOptions {
                    inflation_destination: destination,
                }],
                None,
                None,
            )
            .await?;
            normalizer::finalize(rpc, envelope, keypair, prepare, has_callback).await?
        }
        other => return Err(CapstanError::UnknownIntent(other.to_owned())),
    };

    res.insert("pubkey".to_owned(), json!(keypair.address()));
    res.insert("network".to_owned(), json!(rpc.network_label()));

    match outcome {
        TxOutcome::Submitted { tx_hash, horizon } => {
            res.insert("tx_hash".to_owned(), json!(tx_hash));
            res.insert("horizon".to_owned(), json!(horizon));
        }
        TxOutcome::Prepared {
            signed_envelope_xdr,
            tx_signature,
        } => {
            res.insert("signed_envelope_xdr".to_owned(), json!(signed_envelope_xdr));
            res.insert("tx_signature".to_owned(), json!(tx_signature));
        }
    }

    Ok(res)
}

/// Map internal reaction failures to the stable user-facing taxonomy.
pub fn reaction_error(intent: &str, err: CapstanError) -> CapstanError {
    match err {
        // Credential, validation and network errors pass through untouched.
        e @ (CapstanError::NetworkError
        | CapstanError::AccountNotFound(_)
        | CapstanError::TransactionFailed { .. }
        | CapstanError::HorizonRequired
        | CapstanError::InvalidMessageSignature
        | CapstanError::MissingParam { .. }
        | CapstanError::UnknownIntent(_)
        | CapstanError::IntentRequired
        | CapstanError::InvalidPublicKeyParam(_)
        | CapstanError::InvalidSecretKey
        | CapstanError::EmptySecretKey
        | CapstanError::InvalidPassword
        | CapstanError::InvalidPasswordFormat
        | CapstanError::AccountLocked
        | CapstanError::RejectedByUser) => e,
        other => {
            error!(intent, error = %other, "intent reaction failed");
            match intent {
                "authenticate" => CapstanError::AuthenticationSigningFailed,
                "sign_msg" => CapstanError::MessageSigningFailed,
                "verify_msg" => CapstanError::Generic,
                "tx" | "pay" | "trust" | "inflation_vote" => {
                    CapstanError::TransactionProcessingFailed
                }
                _ => CapstanError::Generic,
            }
        }
    }
}
