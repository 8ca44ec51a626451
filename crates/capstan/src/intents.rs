//! Static registry of the intents a caller may request.
//!
//! Pure lookup table: no I/O, no mutable state. Validation runs on the way
//! in (required params present), and the return-field whitelist trims the
//! result on the way out so callers never see more than an intent declares.

use crate::errors::CapstanError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy)]
pub struct IntentDescriptor {
    pub name: &'static str,
    pub risk: RiskLevel,
    /// Reveals personal data (email, avatar) rather than just key material.
    pub personal_data: bool,
    /// Can move funds or otherwise mutate ledger state.
    pub unsafe_intent: bool,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub returns: &'static [&'static str],
}

pub const INTENTS: &[IntentDescriptor] = &[
    IntentDescriptor {
        name: "public_key",
        risk: RiskLevel::Low,
        personal_data: false,
        unsafe_intent: false,
        required: &[],
        optional: &[],
        returns: &["pubkey"],
    },
    IntentDescriptor {
        name: "basic_info",
        risk: RiskLevel::Low,
        personal_data: true,
        unsafe_intent: false,
        required: &[],
        optional: &[],
        returns: &["info"],
    },
    IntentDescriptor {
        name: "authenticate",
        risk: RiskLevel::Low,
        personal_data: false,
        unsafe_intent: false,
        required: &["token"],
        optional: &[],
        returns: &["pubkey", "token", "token_signature"],
    },
    IntentDescriptor {
        name: "sign_msg",
        risk: RiskLevel::Medium,
        personal_data: false,
        unsafe_intent: false,
        required: &["message"],
        optional: &["pubkey"],
        returns: &["pubkey", "message", "message_signature"],
    },
    IntentDescriptor {
        name: "verify_msg",
        risk: RiskLevel::Low,
        personal_data: false,
        unsafe_intent: false,
        required: &["message", "message_signature"],
        optional: &["pubkey"],
        returns: &["pubkey", "message", "message_signature", "confirmed"],
    },
    IntentDescriptor {
        name: "tx",
        risk: RiskLevel::High,
        personal_data: false,
        unsafe_intent: true,
        required: &["xdr"],
        optional: &["pubkey", "network", "horizon"],
        returns: &["xdr", "signed_envelope_xdr", "pubkey", "tx_signature", "network"],
    },
    IntentDescriptor {
        name: "pay",
        risk: RiskLevel::Medium,
        personal_data: false,
        unsafe_intent: false,
        required: &["amount", "destination"],
        optional: &[
            "asset_code",
            "asset_issuer",
            "memo",
            "memo_type",
            "network",
            "horizon",
            "prepare",
        ],
        returns: &[
            "amount",
            "destination",
            "asset_code",
            "asset_issuer",
            "memo",
            "memo_type",
            "pubkey",
            "network",
            "horizon",
        ],
    },
    IntentDescriptor {
        name: "trust",
        risk: RiskLevel::Low,
        personal_data: false,
        unsafe_intent: false,
        required: &["asset_code", "asset_issuer"],
        optional: &["limit", "pubkey", "network", "horizon", "prepare"],
        returns: &["asset_code", "asset_issuer", "limit", "pubkey", "network", "horizon"],
    },
    IntentDescriptor {
        name: "inflation_vote",
        risk: RiskLevel::Medium,
        personal_data: false,
        unsafe_intent: false,
        required: &["destination"],
        optional: &["pubkey", "network", "horizon", "prepare"],
        returns: &["destination", "pubkey", "network", "horizon"],
    },
];

pub fn get(name: &str) -> Option<&'static IntentDescriptor> {
    INTENTS.iter().find(|d| d.name == name)
}

/// Intents that must talk to the ledger RPC before responding.
pub fn requires_ledger(name: &str) -> bool {
    matches!(name, "tx" | "pay" | "trust" | "inflation_vote")
}

/// Check request shape: the intent must be registered and every required
/// parameter present and non-empty. Unknown extras are accepted here —
/// forward compatibility belongs to the normalizer, not the registry.
pub fn validate(
    name: &str,
    params: &BTreeMap<String, String>,
) -> Result<&'static IntentDescriptor, CapstanError> {
    let descriptor = get(name).ok_or_else(|| CapstanError::UnknownIntent(name.to_owned()))?;
    for &param in descriptor.required {
        if params.get(param).map_or(true, |v| v.is_empty()) {
            return Err(CapstanError::MissingParam {
                param: param.to_owned(),
                intent: name.to_owned(),
            });
        }
    }
    Ok(descriptor)
}

/// Restrict a raw result to the intent's declared return fields.
/// Principle of least disclosure: anything undeclared is dropped.
pub fn filter_return(name: &str, raw: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let Some(descriptor) = get(name) else {
        return BTreeMap::new();
    };
    descriptor
        .returns
        .iter()
        .filter_map(|&field| raw.get(field).map(|v| (field.to_owned(), v.clone())))
        .collect()
}
