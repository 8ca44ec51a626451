//! Stellar-style "strkey" encodings for account ids and secret seeds.
//!
//! A strkey is `base32(version_byte || payload32 || crc16_le)` with no
//! padding: 35 bytes in, 56 characters out. Account ids use version byte
//! `6 << 3` (leading `G`), secret seeds `18 << 3` (leading `S`). The
//! checksum is CRC16/XModem over the version byte and payload, appended
//! little-endian.

use crate::errors::CapstanError;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const VERSION_ACCOUNT: u8 = 6 << 3;
const VERSION_SEED: u8 = 18 << 3;

pub const STRKEY_LEN: usize = 56;

/// The SEP-0007 placeholder source account: the account id of the all-zero
/// public key. Callers use it to request signer substitution at sign time.
pub const ZERO_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0_u8..8 {
            if crc & 0x8000 == 0 {
                crc <<= 1;
            } else {
                crc = (crc << 1) ^ 0x1021;
            }
        }
    }
    crc
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &b in data {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = ((acc >> bits) & 0x1F) as usize;
            out.push(char::from(ALPHABET[idx % 32]));
        }
    }
    if bits > 0 {
        let idx = ((acc << (5 - bits)) & 0x1F) as usize;
        out.push(char::from(ALPHABET[idx % 32]));
    }
    out
}

fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for c in s.bytes() {
        let v = ALPHABET.iter().position(|&a| a == c)?;
        acc = (acc << 5) | v as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xFF) as u8);
        }
    }
    // Trailing bits must be zero padding only.
    if bits > 0 && acc & ((1 << bits) - 1) != 0 {
        return None;
    }
    Some(out)
}

fn encode(version: u8, payload: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(version);
    data.extend_from_slice(payload);
    let crc = crc16_xmodem(&data);
    data.push((crc & 0xFF) as u8);
    data.push((crc >> 8) as u8);
    base32_encode(&data)
}

fn decode(version: u8, s: &str) -> Option<[u8; 32]> {
    if s.len() != STRKEY_LEN {
        return None;
    }
    let data = base32_decode(s)?;
    if data.len() != 35 {
        return None;
    }
    let (body, crc_bytes) = data.split_at(33);
    if body.first() != Some(&version) {
        return None;
    }
    let crc = crc16_xmodem(body);
    if crc_bytes != [(crc & 0xFF) as u8, (crc >> 8) as u8] {
        return None;
    }
    let mut out = [0_u8; 32];
    out.copy_from_slice(body.get(1..33)?);
    Some(out)
}

pub fn encode_public_key(key: &[u8; 32]) -> String {
    encode(VERSION_ACCOUNT, key)
}

pub fn decode_public_key(s: &str) -> Result<[u8; 32], CapstanError> {
    decode(VERSION_ACCOUNT, s).ok_or_else(|| CapstanError::InvalidPublicKeyParam("pubkey".into()))
}

pub fn encode_seed(seed: &[u8; 32]) -> String {
    encode(VERSION_SEED, seed)
}

pub fn decode_seed(s: &str) -> Result<[u8; 32], CapstanError> {
    decode(VERSION_SEED, s).ok_or(CapstanError::InvalidSecretKey)
}

pub fn is_valid_public_key(s: &str) -> bool {
    decode(VERSION_ACCOUNT, s).is_some()
}

pub fn is_valid_seed(s: &str) -> bool {
    decode(VERSION_SEED, s).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_key_encodes_to_placeholder_account() {
        assert_eq!(encode_public_key(&[0_u8; 32]), ZERO_ACCOUNT);
        assert!(is_valid_public_key(ZERO_ACCOUNT));
    }

    #[test]
    fn round_trips_arbitrary_keys() -> eyre::Result<()> {
        let key = [0xAB_u8; 32];
        let s = encode_public_key(&key);
        assert_eq!(s.len(), STRKEY_LEN);
        assert!(s.starts_with('G'));
        assert_eq!(decode_public_key(&s).map_err(|e| eyre::eyre!("{e}"))?, key);

        let seed = [0x17_u8; 32];
        let s = encode_seed(&seed);
        assert!(s.starts_with('S'));
        assert_eq!(decode_seed(&s).map_err(|e| eyre::eyre!("{e}"))?, seed);
        Ok(())
    }

    #[test]
    fn rejects_checksum_and_version_damage() {
        let s = encode_public_key(&[7_u8; 32]);
        // Flip one character (avoiding a no-op replacement).
        let mut damaged: Vec<char> = s.chars().collect();
        if let Some(c) = damaged.get_mut(10) {
            *c = if *c == 'A' { 'B' } else { 'A' };
        }
        let damaged: String = damaged.into_iter().collect();
        assert!(!is_valid_public_key(&damaged));

        // An account key is not a seed.
        assert!(!is_valid_seed(&s));
        // Truncation is invalid.
        assert!(!is_valid_public_key(s.get(..55).unwrap_or_default()));
    }
}
