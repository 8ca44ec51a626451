use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PUBLIC_NETWORK_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
pub const TESTNET_NETWORK_PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const PUBLIC_HORIZON_URL: &str = "https://horizon.stellar.org";
pub const TESTNET_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";

/// A named ledger network: its signing passphrase and default RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub passphrase: String,
    pub horizon: String,
}

/// Fixed geometry of the confirmation surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 440,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapstanConfig {
    /// Trusted origin serving the confirmation surface.
    pub service_url: String,
    /// Path of the confirmation surface on `service_url`.
    pub confirm_path: String,

    /// Application-wide salt mixed into password-derived signing keys.
    ///
    /// Changing this invalidates every previously derived signing key, so it
    /// is config rather than a constant: private deployments pick their own.
    pub signing_salt: String,

    /// Minimum account password length.
    pub min_password_len: usize,
    /// Session duration offered on unlock when the caller does not specify one.
    pub default_session_seconds: u64,

    /// Bound on how long an `open()` call waits for the confirmation surface.
    /// `0` disables the timeout and preserves wait-forever semantics.
    pub response_timeout_seconds: u64,
    /// Ignore surface messages whose origin is not `service_url`.
    pub check_message_origin: bool,

    /// Base fee per operation, in stroops.
    pub base_fee: u32,

    pub window: WindowSettings,

    /// Known networks. Request `network` values not present here are treated
    /// as custom passphrases and require an explicit `horizon` parameter.
    pub networks: BTreeMap<String, NetworkSettings>,
}

impl Default for CapstanConfig {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            "public".to_owned(),
            NetworkSettings {
                passphrase: PUBLIC_NETWORK_PASSPHRASE.into(),
                horizon: PUBLIC_HORIZON_URL.into(),
            },
        );
        networks.insert(
            "testnet".to_owned(),
            NetworkSettings {
                passphrase: TESTNET_NETWORK_PASSPHRASE.into(),
                horizon: TESTNET_HORIZON_URL.into(),
            },
        );
        Self {
            service_url: "https://id.capstan.dev".into(),
            confirm_path: "/confirm".into(),
            signing_salt: "capstan:signing:v1".into(),
            min_password_len: 8,
            default_session_seconds: 600,
            response_timeout_seconds: 0,
            check_message_origin: true,
            base_fee: 100,
            window: WindowSettings::default(),
            networks,
        }
    }
}

impl CapstanConfig {
    pub fn network(&self, name: &str) -> Option<&NetworkSettings> {
        self.networks.get(&name.trim().to_lowercase())
    }

    pub fn confirm_url(&self) -> String {
        format!(
            "{}{}",
            self.service_url.trim_end_matches('/'),
            self.confirm_path
        )
    }
}
