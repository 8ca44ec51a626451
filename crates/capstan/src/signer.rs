//! Deterministic signing keys derived from an account password.
//!
//! The derivation is a pure function of `(signing_salt, password)`, so a
//! relying party that knows the scheme can independently verify signed
//! authentication challenges. Determinism is load-bearing: the same password
//! must always map to the same public key, across calls and restarts.

use crate::errors::CapstanError;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};

/// Detached ed25519 signatures are 64 bytes; base64 renders them in 88 chars.
pub const SIGNATURE_B64_LEN: usize = 88;

pub fn derive_keypair(salt: &str, password: &SecretString) -> Result<SigningKey, CapstanError> {
    if password.expose_secret().is_empty() {
        return Err(CapstanError::InvalidPasswordFormat);
    }
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.expose_secret().as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    Ok(SigningKey::from_bytes(&seed))
}

/// Derive the hex-encoded public key for a password.
pub fn derive_public_key(salt: &str, password: &SecretString) -> Result<String, CapstanError> {
    let kp = derive_keypair(salt, password)?;
    Ok(hex::encode(kp.verifying_key().to_bytes()))
}

/// Sign `data` with the key pair derived from `password`; returns base64.
pub fn sign(salt: &str, data: &str, password: &SecretString) -> Result<String, CapstanError> {
    if data.is_empty() {
        return Err(CapstanError::InvalidData);
    }
    let kp = derive_keypair(salt, password)?;
    let sig = kp.sign(data.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(sig.to_bytes()))
}

/// Verify a detached signature against a hex-encoded public key.
///
/// A well-formed but non-matching signature is `Ok(false)`; malformed inputs
/// (empty data, bad encodings) are errors.
pub fn verify(data: &str, signature_b64: &str, public_key_hex: &str) -> Result<bool, CapstanError> {
    if data.is_empty() {
        return Err(CapstanError::InvalidData);
    }
    let raw_sig = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_e| CapstanError::InvalidData)?;
    let sig = Signature::from_slice(&raw_sig).map_err(|_e| CapstanError::InvalidData)?;

    let raw_pk = hex::decode(public_key_hex).map_err(|_e| CapstanError::InvalidData)?;
    let pk_bytes: [u8; 32] = raw_pk
        .as_slice()
        .try_into()
        .map_err(|_e| CapstanError::InvalidData)?;
    let pk = VerifyingKey::from_bytes(&pk_bytes).map_err(|_e| CapstanError::InvalidData)?;

    Ok(pk.verify(data.as_bytes(), &sig).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "capstan:signing:v1";

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.to_owned().into())
    }

    #[test]
    fn fails_to_derive_for_empty_password() {
        let err = derive_public_key(SALT, &pw(""));
        assert!(matches!(err, Err(CapstanError::InvalidPasswordFormat)));
    }

    #[test]
    fn derivation_is_deterministic_and_distinct() -> Result<(), CapstanError> {
        let a = derive_public_key(SALT, &pw("a1234567890"))?;
        let b = derive_public_key(SALT, &pw("a1234567891"))?;
        assert_eq!(derive_public_key(SALT, &pw("a1234567890"))?, a);
        assert_eq!(derive_public_key(SALT, &pw("a1234567891"))?, b);
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn fails_to_sign_empty_data_or_without_password() {
        assert!(matches!(
            sign(SALT, "", &pw("password")),
            Err(CapstanError::InvalidData)
        ));
        assert!(matches!(
            sign(SALT, "123", &pw("")),
            Err(CapstanError::InvalidPasswordFormat)
        ));
    }

    #[test]
    fn signs_and_verifies_round_trip() -> Result<(), CapstanError> {
        let password = pw("correct horse battery staple");
        let data = "2026-08-07T00:00:00Z";
        let signature = sign(SALT, data, &password)?;
        assert_eq!(signature.len(), SIGNATURE_B64_LEN);

        let pubkey = derive_public_key(SALT, &password)?;
        assert!(verify(data, &signature, &pubkey)?);
        Ok(())
    }

    #[test]
    fn flipped_bytes_verify_false_without_error() -> Result<(), CapstanError> {
        let password = pw("correct horse battery staple");
        let pubkey = derive_public_key(SALT, &password)?;
        let signature = sign(SALT, "hello", &password)?;

        // Tampered data.
        assert!(!verify("hellO", &signature, &pubkey)?);

        // Tampered signature byte (still 64 bytes after re-encoding).
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&signature)
            .map_err(|_e| CapstanError::InvalidData)?;
        if let Some(b) = raw.get_mut(3) {
            *b ^= 0x01;
        }
        let tampered = base64::engine::general_purpose::STANDARD.encode(&raw);
        assert!(!verify("hello", &tampered, &pubkey)?);
        Ok(())
    }

    #[test]
    fn malformed_inputs_are_errors_not_false() {
        assert!(matches!(
            verify("data", "definitely not base64!!", &"00".repeat(32)),
            Err(CapstanError::InvalidData)
        ));
        assert!(matches!(
            verify("data", &"A".repeat(88), "not-hex"),
            Err(CapstanError::InvalidData)
        ));
    }
}
