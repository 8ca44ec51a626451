//! Ledger transaction model and wire codec.
//!
//! Envelopes travel as base64 over the intent protocol and are treated as
//! opaque by everything except the normalizer, which may rewrite exactly two
//! fields (source account, sequence number) under the placeholder rules.

pub mod horizon;
pub mod normalizer;

use crate::{errors::CapstanError, strkey};
use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Asset {
    Native,
    Issued { code: String, issuer: String },
}

impl Asset {
    pub fn issued(code: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self::Issued {
            code: code.into(),
            issuer: issuer.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Memo {
    Text(String),
    Id(u64),
    Hash(String),
    Return(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoKind {
    Text,
    Id,
    Hash,
    Return,
}

/// Normalize a free-form memo type to one of the accepted kinds.
/// `"MEMO_TEXT"`-style values map by their last `_`-segment; anything
/// unrecognized or absent is treated as text.
pub fn normalize_memo_type(memo_type: Option<&str>) -> MemoKind {
    let Some(raw) = memo_type else {
        return MemoKind::Text;
    };
    match raw.rsplit('_').next().map(str::to_lowercase).as_deref() {
        Some("id") => MemoKind::Id,
        Some("hash") => MemoKind::Hash,
        Some("return") => MemoKind::Return,
        _ => MemoKind::Text,
    }
}

pub fn build_memo(value: &str, memo_type: Option<&str>) -> Result<Memo, CapstanError> {
    Ok(match normalize_memo_type(memo_type) {
        MemoKind::Text => Memo::Text(value.to_owned()),
        MemoKind::Id => Memo::Id(value.parse().map_err(|_e| CapstanError::InvalidData)?),
        MemoKind::Hash => Memo::Hash(value.to_owned()),
        MemoKind::Return => Memo::Return(value.to_owned()),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    Payment {
        destination: String,
        asset: Asset,
        amount: String,
    },
    ChangeTrust {
        asset: Asset,
        limit: String,
    },
    SetOptions {
        inflation_destination: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub source: String,
    pub fee: u32,
    pub sequence: i64,
    pub memo: Option<Memo>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecoratedSignature {
    /// Last four bytes of the signer's public key.
    pub hint: [u8; 4],
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub const fn new(tx: Transaction) -> Self {
        Self {
            tx,
            signatures: vec![],
        }
    }

    pub fn to_xdr_base64(&self) -> Result<String, CapstanError> {
        let raw = bincode::serialize(self).map_err(|_e| CapstanError::TransactionProcessingFailed)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(raw))
    }

    pub fn from_xdr_base64(s: &str) -> Result<Self, CapstanError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|_e| CapstanError::InvalidData)?;
        bincode::deserialize(&raw).map_err(|_e| CapstanError::InvalidData)
    }

    /// Transaction hash: the digest of the network-scoped signature base.
    /// Signing keys never sign the raw envelope, only this hash.
    pub fn hash(&self, network_passphrase: &str) -> Result<[u8; 32], CapstanError> {
        let body = bincode::serialize(&self.tx)
            .map_err(|_e| CapstanError::TransactionProcessingFailed)?;
        let network_id: [u8; 32] = Sha256::digest(network_passphrase.as_bytes()).into();
        let mut hasher = Sha256::new();
        hasher.update(network_id);
        hasher.update(&body);
        Ok(hasher.finalize().into())
    }

    pub fn sign(&mut self, keypair: &Keypair, network_passphrase: &str) -> Result<(), CapstanError> {
        let hash = self.hash(network_passphrase)?;
        self.signatures.push(DecoratedSignature {
            hint: keypair.signature_hint(),
            signature: keypair.sign(&hash).to_vec(),
        });
        Ok(())
    }
}

/// A ledger signing key wrapping a strkey seed.
#[derive(Debug, Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn from_secret(secret: &str) -> Result<Self, CapstanError> {
        let seed = strkey::decode_seed(secret)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    pub fn address(&self) -> String {
        strkey::encode_public_key(&self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing.sign(data).to_bytes()
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        self.signing.verifying_key().verify(data, &sig).is_ok()
    }

    pub fn signature_hint(&self) -> [u8; 4] {
        let pk = self.signing.verifying_key().to_bytes();
        let mut hint = [0_u8; 4];
        hint.copy_from_slice(&pk[28..32]);
        hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::AccountKeypair;

    fn sample_tx(source: &str) -> Transaction {
        Transaction {
            source: source.to_owned(),
            fee: 100,
            sequence: 42,
            memo: Some(Memo::Text("thanks".into())),
            operations: vec![Operation::Payment {
                destination: "GDESTINATION".into(),
                asset: Asset::Native,
                amount: "1.5".into(),
            }],
        }
    }

    #[test]
    fn memo_type_normalization() {
        assert_eq!(normalize_memo_type(None), MemoKind::Text);
        assert_eq!(normalize_memo_type(Some("MEMO_TEXT")), MemoKind::Text);
        assert_eq!(normalize_memo_type(Some("MEMO_ID")), MemoKind::Id);
        assert_eq!(normalize_memo_type(Some("hash")), MemoKind::Hash);
        assert_eq!(normalize_memo_type(Some("MEMO_RETURN")), MemoKind::Return);
        assert_eq!(normalize_memo_type(Some("something_else")), MemoKind::Text);
    }

    #[test]
    fn envelope_wire_round_trip() -> Result<(), CapstanError> {
        let kp = AccountKeypair::generate(None);
        let envelope = TransactionEnvelope::new(sample_tx(&kp.address()?));
        let encoded = envelope.to_xdr_base64()?;
        let decoded = TransactionEnvelope::from_xdr_base64(&encoded)?;
        assert_eq!(decoded, envelope);
        Ok(())
    }

    #[test]
    fn malformed_envelope_is_invalid_data() {
        assert!(matches!(
            TransactionEnvelope::from_xdr_base64("not base64 at all!!"),
            Err(CapstanError::InvalidData)
        ));
        let garbage = base64::engine::general_purpose::STANDARD.encode(b"garbage");
        assert!(matches!(
            TransactionEnvelope::from_xdr_base64(&garbage),
            Err(CapstanError::InvalidData)
        ));
    }

    #[test]
    fn signing_appends_verifiable_signature() -> Result<(), CapstanError> {
        let account_kp = AccountKeypair::generate(None);
        let keypair = Keypair::from_secret(&account_kp.secret)?;
        let mut envelope = TransactionEnvelope::new(sample_tx(&keypair.address()));

        envelope.sign(&keypair, "Test SDF Network ; September 2015")?;
        assert_eq!(envelope.signatures.len(), 1);

        let hash = envelope.hash("Test SDF Network ; September 2015")?;
        let sig = &envelope.signatures[0];
        assert_eq!(sig.hint, keypair.signature_hint());
        assert!(keypair.verify(&hash, &sig.signature));

        // The hash is network-scoped.
        let other = envelope.hash("Public Global Stellar Network ; September 2015")?;
        assert_ne!(hash, other);
        Ok(())
    }
}
