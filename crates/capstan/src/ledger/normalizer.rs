//! Builds caller-described transactions and safely rewrites templated ones.
//!
//! Incoming envelopes may be under-specified on purpose: a sentinel source
//! account (the all-zero key) and/or a zero sequence number ask the signer
//! to fill in its own identity and the current on-ledger sequence. Both
//! substitutions are checked independently and concrete values always pass
//! through untouched.

use super::{
    build_memo,
    horizon::HorizonClient,
    Keypair, Memo, Operation, Transaction, TransactionEnvelope,
};
use crate::{errors::CapstanError, strkey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Envelope was submitted; the ledger confirmed it under this hash.
    Submitted { tx_hash: String, horizon: String },
    /// Envelope was signed but intentionally not submitted.
    Prepared {
        signed_envelope_xdr: String,
        tx_signature: String,
    },
}

/// Build an unsigned envelope on top of the signer's current sequence.
pub async fn build<H: HorizonClient>(
    rpc: &H,
    signer: &Keypair,
    base_fee: u32,
    operations: Vec<Operation>,
    memo: Option<&str>,
    memo_type: Option<&str>,
) -> Result<TransactionEnvelope, CapstanError> {
    if operations.is_empty() {
        return Err(CapstanError::InvalidData);
    }
    let account = rpc.load_account(&signer.address()).await?;

    let memo: Option<Memo> = match memo {
        Some(m) if !m.is_empty() => Some(build_memo(m, memo_type)?),
        _ => None,
    };
    let ops = u32::try_from(operations.len()).map_err(|_e| CapstanError::InvalidData)?;
    let fee = base_fee
        .checked_mul(ops)
        .ok_or(CapstanError::InvalidData)?;
    let sequence = account
        .sequence
        .checked_add(1)
        .ok_or(CapstanError::TransactionProcessingFailed)?;

    Ok(TransactionEnvelope::new(Transaction {
        source: account.id,
        fee,
        sequence,
        memo,
        operations,
    }))
}

/// Apply the placeholder substitutions to a caller-supplied envelope.
pub async fn normalize_incoming<H: HorizonClient>(
    rpc: &H,
    mut envelope: TransactionEnvelope,
    signer_address: &str,
) -> Result<TransactionEnvelope, CapstanError> {
    let replace_source = envelope.tx.source == strkey::ZERO_ACCOUNT;
    let replace_sequence = envelope.tx.sequence == 0;

    if replace_source || replace_sequence {
        let lookup = if replace_source {
            signer_address.to_owned()
        } else {
            envelope.tx.source.clone()
        };
        let account = rpc.load_account(&lookup).await?;
        if replace_source {
            envelope.tx.source = account.id;
        }
        if replace_sequence {
            envelope.tx.sequence = account
                .sequence
                .checked_add(1)
                .ok_or(CapstanError::TransactionProcessingFailed)?;
        }
    }

    Ok(envelope)
}

/// Sign the envelope hash and either submit or hand back the signed form.
///
/// Submission only happens when the caller neither asked to `prepare` nor
/// supplied a callback; callback flows deliver the signed envelope to the
/// caller's server, which submits on its own terms.
pub async fn finalize<H: HorizonClient>(
    rpc: &H,
    mut envelope: TransactionEnvelope,
    keypair: &Keypair,
    prepare: bool,
    has_callback: bool,
) -> Result<TxOutcome, CapstanError> {
    envelope.sign(keypair, rpc.network_passphrase())?;

    if !prepare && !has_callback {
        let res = rpc.submit_transaction(&envelope.to_xdr_base64()?).await?;
        return Ok(TxOutcome::Submitted {
            tx_hash: res.hash,
            horizon: rpc.server_url().to_owned(),
        });
    }

    let hash = envelope.hash(rpc.network_passphrase())?;
    Ok(TxOutcome::Prepared {
        signed_envelope_xdr: envelope.to_xdr_base64()?,
        tx_signature: hex::encode(keypair.sign(&hash)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::horizon::{LedgerAccount, SubmitResult};
    use crate::ledger::Asset;
    use crate::vault::AccountKeypair;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockHorizon {
        accounts: BTreeMap<String, i64>,
        loads: AtomicUsize,
    }

    impl MockHorizon {
        fn with_account(id: &str, sequence: i64) -> Self {
            let mut accounts = BTreeMap::new();
            accounts.insert(id.to_owned(), sequence);
            Self {
                accounts,
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl HorizonClient for MockHorizon {
        fn server_url(&self) -> &str {
            "http://horizon.local"
        }

        fn network_passphrase(&self) -> &str {
            "Test SDF Network ; September 2015"
        }

        fn network_label(&self) -> &str {
            "testnet"
        }

        async fn load_account(&self, account_id: &str) -> Result<LedgerAccount, CapstanError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.accounts
                .get(account_id)
                .map(|&sequence| LedgerAccount {
                    id: account_id.to_owned(),
                    sequence,
                })
                .ok_or_else(|| CapstanError::AccountNotFound(self.network_label().to_owned()))
        }

        async fn submit_transaction(
            &self,
            envelope_b64: &str,
        ) -> Result<SubmitResult, CapstanError> {
            let envelope = TransactionEnvelope::from_xdr_base64(envelope_b64)?;
            let hash = envelope.hash(self.network_passphrase())?;
            Ok(SubmitResult {
                hash: hex::encode(hash),
            })
        }
    }

    fn test_keypair() -> Result<(Keypair, String), CapstanError> {
        let account_kp = AccountKeypair::generate(None);
        let kp = Keypair::from_secret(&account_kp.secret)?;
        let address = kp.address();
        Ok((kp, address))
    }

    fn payment_op() -> Operation {
        Operation::Payment {
            destination: "GDESTINATION".into(),
            asset: Asset::Native,
            amount: "10".into(),
        }
    }

    #[tokio::test]
    async fn build_uses_on_ledger_sequence_plus_one() -> Result<(), CapstanError> {
        let (kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);

        let envelope = build(&rpc, &kp, 100, vec![payment_op()], Some("hi"), Some("MEMO_TEXT")).await?;
        assert_eq!(envelope.tx.source, address);
        assert_eq!(envelope.tx.sequence, 42);
        assert_eq!(envelope.tx.fee, 100);
        assert_eq!(envelope.tx.memo, Some(Memo::Text("hi".into())));
        Ok(())
    }

    #[tokio::test]
    async fn placeholder_source_and_sequence_are_substituted() -> Result<(), CapstanError> {
        let (_kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);

        let envelope = TransactionEnvelope::new(Transaction {
            source: strkey::ZERO_ACCOUNT.into(),
            fee: 100,
            sequence: 0,
            memo: None,
            operations: vec![payment_op()],
        });

        let normalized = normalize_incoming(&rpc, envelope, &address).await?;
        assert_eq!(normalized.tx.source, address);
        assert_eq!(normalized.tx.sequence, 42);
        Ok(())
    }

    #[tokio::test]
    async fn concrete_envelopes_pass_through_without_rpc_calls() -> Result<(), CapstanError> {
        let (_kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);

        let envelope = TransactionEnvelope::new(Transaction {
            source: address.clone(),
            fee: 100,
            sequence: 7,
            memo: None,
            operations: vec![payment_op()],
        });

        let normalized = normalize_incoming(&rpc, envelope.clone(), &address).await?;
        assert_eq!(normalized, envelope);
        assert_eq!(rpc.loads.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn sequence_substitution_resolves_against_concrete_source() -> Result<(), CapstanError> {
        let (_kp, signer_address) = test_keypair()?;
        let (_other, other_address) = test_keypair()?;
        let mut rpc = MockHorizon::with_account(&other_address, 99);
        rpc.accounts.insert(signer_address.clone(), 41);

        // Concrete foreign source + zero sequence: sequence comes from the
        // envelope's own source account, not from the signer.
        let envelope = TransactionEnvelope::new(Transaction {
            source: other_address.clone(),
            fee: 100,
            sequence: 0,
            memo: None,
            operations: vec![payment_op()],
        });

        let normalized = normalize_incoming(&rpc, envelope, &signer_address).await?;
        assert_eq!(normalized.tx.source, other_address);
        assert_eq!(normalized.tx.sequence, 100);
        Ok(())
    }

    #[tokio::test]
    async fn finalize_submits_when_not_prepared() -> Result<(), CapstanError> {
        let (kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);
        let envelope = build(&rpc, &kp, 100, vec![payment_op()], None, None).await?;

        let outcome = finalize(&rpc, envelope, &kp, false, false).await?;
        assert!(matches!(
            outcome,
            TxOutcome::Submitted { ref horizon, .. } if horizon == "http://horizon.local"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn finalize_prepares_signed_envelope_on_request() -> Result<(), CapstanError> {
        let (kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);
        let envelope = build(&rpc, &kp, 100, vec![payment_op()], None, None).await?;

        let TxOutcome::Prepared {
            signed_envelope_xdr,
            tx_signature,
        } = finalize(&rpc, envelope, &kp, true, false).await?
        else {
            return Err(CapstanError::Generic);
        };

        let signed = TransactionEnvelope::from_xdr_base64(&signed_envelope_xdr)?;
        assert_eq!(signed.signatures.len(), 1);

        // The standalone signature is over the tx hash, hex-encoded.
        let hash = signed.hash(rpc.network_passphrase())?;
        let raw = hex::decode(&tx_signature).map_err(|_e| CapstanError::InvalidData)?;
        assert!(kp.verify(&hash, &raw));
        Ok(())
    }

    #[tokio::test]
    async fn callback_flows_never_submit() -> Result<(), CapstanError> {
        let (kp, address) = test_keypair()?;
        let rpc = MockHorizon::with_account(&address, 41);
        let envelope = build(&rpc, &kp, 100, vec![payment_op()], None, None).await?;

        let outcome = finalize(&rpc, envelope, &kp, false, true).await?;
        assert!(matches!(outcome, TxOutcome::Prepared { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_maps_to_not_found() -> Result<(), CapstanError> {
        let (kp, _address) = test_keypair()?;
        let rpc = MockHorizon {
            accounts: BTreeMap::new(),
            loads: AtomicUsize::new(0),
        };
        let err = build(&rpc, &kp, 100, vec![payment_op()], None, None).await;
        assert!(matches!(err, Err(CapstanError::AccountNotFound(ref n)) if n == "testnet"));
        Ok(())
    }
}
