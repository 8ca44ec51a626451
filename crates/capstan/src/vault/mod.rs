//! Credential vault: account records, encryption-key lifecycle, and the
//! Locked/Unlocked state machine.
//!
//! The sole discriminator of the Unlocked state is `encryption_key` being
//! present in memory. Plaintext keypairs exist only while Unlocked; every
//! mutation path asserts that first.

pub mod crypto;
pub mod session;
pub mod store;

use crate::{errors::CapstanError, paths::CapstanPaths, strkey};
use base64::Engine as _;
use crypto::CryptoBox;
use ed25519_dalek::SigningKey;
use eyre::Context as _;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use session::SessionStore;
use store::{AccountRecord, AccountStore};
use tracing::warn;
use zeroize::Zeroizing;

pub const DEMO_EMAIL: &str = "demo@demo.com";

/// A single ledger secret key with display metadata. The address is always
/// derived from the seed, never stored, so the two cannot diverge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountKeypair {
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
}

impl AccountKeypair {
    pub fn new(secret: impl Into<String>, friendly_name: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            friendly_name,
        }
    }

    /// Generate a fresh random keypair.
    pub fn generate(friendly_name: Option<String>) -> Self {
        let mut seed = Zeroizing::new([0_u8; 32]);
        crypto::fill_random(seed.as_mut());
        Self {
            secret: strkey::encode_seed(&seed),
            friendly_name,
        }
    }

    pub fn validate(&self) -> Result<(), CapstanError> {
        if self.secret.is_empty() {
            return Err(CapstanError::EmptySecretKey);
        }
        if !strkey::is_valid_seed(&self.secret) {
            return Err(CapstanError::InvalidSecretKey);
        }
        Ok(())
    }

    /// The account id derived from the secret seed.
    pub fn address(&self) -> Result<String, CapstanError> {
        let seed = strkey::decode_seed(&self.secret)?;
        let signing = SigningKey::from_bytes(&seed);
        Ok(strkey::encode_public_key(&signing.verifying_key().to_bytes()))
    }

    /// Human-facing label, recomputed on demand.
    pub fn display_name(&self) -> Result<String, CapstanError> {
        let address = self.address()?;
        Ok(match &self.friendly_name {
            Some(name) => format!("{name} ({})", format_address(&address, 8)),
            None => format_address(&address, 16),
        })
    }
}

fn format_address(address: &str, visible: usize) -> String {
    let half = visible / 2;
    if address.len() <= visible {
        return address.to_owned();
    }
    let head: String = address.chars().take(half).collect();
    let tail: String = address
        .chars()
        .skip(address.chars().count().saturating_sub(half))
        .collect();
    format!("{head}…{tail}")
}

/// Plaintext payload sealed into `encrypted_data`.
#[derive(Debug, Serialize, Deserialize)]
struct SensitiveData {
    keypairs: Vec<AccountKeypair>,
}

/// One user identity: a namespace of key material addressed by email.
#[derive(Debug, Clone)]
pub struct Account {
    pub email: String,
    pub avatar: Option<String>,
    pub use_multi_login: bool,
    pub auth_public_key: Option<String>,
    kdf_salt: [u8; 16],
    access_code: CryptoBox,
    encrypted_data: Option<CryptoBox>,
    encryption_key: Option<Zeroizing<[u8; 32]>>,
    keypairs: Vec<AccountKeypair>,
}

impl Account {
    pub const fn is_unlocked(&self) -> bool {
        self.encryption_key.is_some()
    }

    fn ensure_unlocked(&self) -> Result<(), CapstanError> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(CapstanError::AccountLocked)
        }
    }

    /// Plaintext keypairs; only available while Unlocked.
    pub fn keypairs(&self) -> Result<&[AccountKeypair], CapstanError> {
        self.ensure_unlocked()?;
        Ok(&self.keypairs)
    }

    pub fn find_keypair(&self, address: &str) -> Result<Option<&AccountKeypair>, CapstanError> {
        self.ensure_unlocked()?;
        for kp in &self.keypairs {
            if kp.address()? == address {
                return Ok(Some(kp));
            }
        }
        Ok(None)
    }

    fn to_record(&self) -> AccountRecord {
        AccountRecord {
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            use_multi_login: self.use_multi_login,
            auth_public_key: self.auth_public_key.clone(),
            kdf_salt_b64: base64::engine::general_purpose::STANDARD.encode(self.kdf_salt),
            access_code: self.access_code.clone(),
            encrypted_data: self.encrypted_data.clone(),
        }
    }

    fn from_record(record: AccountRecord) -> eyre::Result<Self> {
        let salt_bytes = base64::engine::general_purpose::STANDARD
            .decode(&record.kdf_salt_b64)
            .context("decode kdf salt")?;
        if salt_bytes.len() != 16 {
            eyre::bail!("kdf salt must decode to 16 bytes");
        }
        let mut kdf_salt = [0_u8; 16];
        kdf_salt.copy_from_slice(&salt_bytes);
        Ok(Self {
            email: record.email,
            avatar: record.avatar,
            use_multi_login: record.use_multi_login,
            auth_public_key: record.auth_public_key,
            kdf_salt,
            access_code: record.access_code,
            encrypted_data: record.encrypted_data,
            encryption_key: None,
            keypairs: vec![],
        })
    }

    /// Re-derive `keypairs` from `encrypted_data` under the current key.
    fn decrypt_sensitive(&mut self) -> eyre::Result<()> {
        let key = self
            .encryption_key
            .as_ref()
            .ok_or(CapstanError::AccountLocked)?;
        let Some(sealed) = &self.encrypted_data else {
            self.keypairs = vec![];
            return Ok(());
        };
        let Ok(plain) = crypto::decrypt_aes_gcm(key, sealed) else {
            return Err(CapstanError::EncryptedDataNotFound.into());
        };
        let data: SensitiveData =
            serde_json::from_slice(&plain).map_err(|_e| CapstanError::EncryptedDataNotFound)?;
        self.keypairs = data.keypairs;
        Ok(())
    }

    fn encrypt_sensitive(&mut self) -> eyre::Result<()> {
        let key = self
            .encryption_key
            .as_ref()
            .ok_or(CapstanError::AccountLocked)?;
        let plain = serde_json::to_vec(&SensitiveData {
            keypairs: self.keypairs.clone(),
        })
        .context("serialize keypairs")?;
        self.encrypted_data = Some(crypto::encrypt_aes_gcm(key, &plain)?);
        Ok(())
    }
}

/// Remote mirror for accounts with multi-login enabled. Server sync is an
/// external collaborator; the crate ships no implementation.
pub trait RemoteAccountStore {
    fn persist(&self, record: &AccountRecord) -> eyre::Result<()>;
}

pub struct Vault {
    accounts: AccountStore,
    sessions: SessionStore,
    min_password_len: usize,
    signing_salt: String,
    remote: Option<Box<dyn RemoteAccountStore + Send + Sync>>,
}

impl Vault {
    pub fn open(paths: &CapstanPaths, min_password_len: usize, signing_salt: &str) -> Self {
        Self {
            accounts: AccountStore::new(paths),
            sessions: SessionStore::new(paths),
            min_password_len,
            signing_salt: signing_salt.to_owned(),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Box<dyn RemoteAccountStore + Send + Sync>) -> Self {
        self.remote = Some(remote);
        self
    }

    fn validate_password(&self, password: &SecretString) -> Result<(), CapstanError> {
        use secrecy::ExposeSecret as _;
        if password.expose_secret().len() < self.min_password_len {
            return Err(CapstanError::InvalidPasswordFormat);
        }
        Ok(())
    }

    /// Create a new Unlocked account. Nothing is persisted until `save`.
    pub fn create(&self, email: &str, password: &SecretString) -> eyre::Result<Account> {
        let email = normalize_email(email)?;
        self.validate_password(password)?;

        let encryption_key = Zeroizing::new(crypto::random_key32());
        let kdf_salt = crypto::random_salt16();
        let wrap = crypto::derive_password_key(&email, password, &kdf_salt)?;
        let access_code = crypto::encrypt_aes_gcm(&wrap, encryption_key.as_ref())?;

        Ok(Account {
            email,
            avatar: None,
            use_multi_login: false,
            auth_public_key: None,
            kdf_salt,
            access_code,
            encrypted_data: None,
            encryption_key: Some(encryption_key),
            keypairs: vec![],
        })
    }

    /// Unlock the account and, when a duration is requested, persist a
    /// session so later loads skip the password until it expires.
    pub fn unlock(
        &self,
        account: &mut Account,
        password: &SecretString,
        session_duration_seconds: u64,
    ) -> eyre::Result<()> {
        self.validate_password(password)?;

        let wrap = crypto::derive_password_key(&account.email, password, &account.kdf_salt)?;
        // The GCM tag rejects a wrong password deterministically.
        let Ok(raw) = crypto::decrypt_aes_gcm(&wrap, &account.access_code) else {
            return Err(CapstanError::InvalidPassword.into());
        };
        if raw.len() != 32 {
            return Err(CapstanError::InvalidPassword.into());
        }
        let mut key = Zeroizing::new([0_u8; 32]);
        key.copy_from_slice(&raw);

        account.encryption_key = Some(key);
        account.decrypt_sensitive()?;

        if session_duration_seconds > 0 {
            if let Some(k) = &account.encryption_key {
                self.sessions
                    .save(&account.email, k, session_duration_seconds)?;
            }
        }
        Ok(())
    }

    /// Re-encrypt and persist the account record locally; mirror remotely
    /// only when multi-login is enabled.
    pub fn save(&self, account: &mut Account) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        account.encrypt_sensitive()?;
        let record = account.to_record();
        self.accounts.persist(&record)?;
        if account.use_multi_login {
            match &self.remote {
                Some(remote) => remote.persist(&record).context("persist account remotely")?,
                None => eyre::bail!("multi-login is enabled but no remote account store is configured"),
            }
        }
        Ok(())
    }

    pub fn add_keypair(&self, account: &mut Account, keypair: AccountKeypair) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        keypair.validate()?;
        let address = keypair.address()?;
        for existing in &account.keypairs {
            if existing.address()? == address {
                eyre::bail!("Account with the same address has been already added.");
            }
        }
        account.keypairs.push(keypair);
        self.save(account)
    }

    pub fn remove_keypair(&self, account: &mut Account, address: &str) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        let mut kept = Vec::with_capacity(account.keypairs.len());
        for kp in account.keypairs.drain(..) {
            if kp.address()? != address {
                kept.push(kp);
            }
        }
        account.keypairs = kept;
        self.save(account)
    }

    /// Rotate the encryption key under a new password. In-memory only; the
    /// caller persists via `save`.
    pub fn change_password(
        &self,
        account: &mut Account,
        new_password: &SecretString,
    ) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        self.validate_password(new_password)?;

        let encryption_key = Zeroizing::new(crypto::random_key32());
        let kdf_salt = crypto::random_salt16();
        let wrap = crypto::derive_password_key(&account.email, new_password, &kdf_salt)?;
        account.access_code = crypto::encrypt_aes_gcm(&wrap, encryption_key.as_ref())?;
        account.kdf_salt = kdf_salt;
        account.encryption_key = Some(encryption_key);
        account.encrypt_sensitive()?;
        Ok(())
    }

    /// Enable the remote mirror for this account. The password is verified
    /// against the access code first, then stretched into the verification
    /// key the remote store uses to authenticate future writes.
    pub fn enable_multi_login(
        &self,
        account: &mut Account,
        password: &SecretString,
    ) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        if account.use_multi_login {
            return Ok(());
        }
        // Re-derive the wrapping key so a mistyped password cannot enroll
        // an unverifiable auth key.
        let wrap = crypto::derive_password_key(&account.email, password, &account.kdf_salt)?;
        if crypto::decrypt_aes_gcm(&wrap, &account.access_code).is_err() {
            return Err(CapstanError::InvalidPassword.into());
        }
        account.auth_public_key = Some(crate::signer::derive_public_key(
            &self.signing_salt,
            password,
        )?);
        account.use_multi_login = true;
        self.save(account)
    }

    pub fn disable_multi_login(&self, account: &mut Account) -> eyre::Result<()> {
        account.ensure_unlocked()?;
        account.use_multi_login = false;
        account.auth_public_key = None;
        self.save(account)
    }

    /// The only sanctioned exit from the Unlocked state.
    pub fn sign_out(&self, account: &mut Account) -> eyre::Result<()> {
        account.keypairs.clear();
        account.encryption_key = None;
        self.sessions.expire(&account.email)?;
        Ok(())
    }

    /// Load one persisted account, attempting best-effort session restore.
    pub fn load_account(&self, email: &str) -> eyre::Result<Option<Account>> {
        let Some(record) = self.accounts.load(email)? else {
            return Ok(None);
        };
        let mut account = Account::from_record(record)?;
        self.try_restore_session(&mut account);
        Ok(Some(account))
    }

    /// Load every persisted account. Runs once per process start.
    pub fn load_accounts(&self) -> eyre::Result<Vec<Account>> {
        let mut out = vec![];
        for email in self.accounts.enumerate()? {
            match self.load_account(&email) {
                Ok(Some(account)) => out.push(account),
                Ok(None) => {}
                Err(e) => warn!(email = %email, error = %e, "skipping unreadable account record"),
            }
        }
        Ok(out)
    }

    fn try_restore_session(&self, account: &mut Account) {
        match self.sessions.restore(&account.email) {
            Ok(Some(key)) => {
                account.encryption_key = Some(key);
                if let Err(e) = account.decrypt_sensitive() {
                    warn!(email = %account.email, error = %e, "session restore failed to decrypt account data");
                    account.encryption_key = None;
                    account.keypairs.clear();
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(email = %account.email, error = %e, "session restore failed");
            }
        }
    }

    pub fn delete(&self, account: &Account) -> eyre::Result<()> {
        self.sessions.expire(&account.email)?;
        self.accounts.delete(&account.email)
    }

    /// Ensure a permanently unlocked demo account exists, recreating it if a
    /// previous one cannot be restored.
    pub fn ensure_demo_account(&self) -> eyre::Result<Account> {
        if let Some(existing) = self.load_account(DEMO_EMAIL)? {
            if existing.is_unlocked() {
                return Ok(existing);
            }
            self.delete(&existing)?;
        }

        let mut pwd_bytes = [0_u8; 24];
        crypto::fill_random(&mut pwd_bytes);
        let password = SecretString::new(hex::encode(pwd_bytes).into());

        let mut account = self.create(DEMO_EMAIL, &password)?;
        self.add_keypair(
            &mut account,
            AccountKeypair::generate(Some("Demo account".into())),
        )?;
        // Effectively permanent: ~3170 years.
        self.sessions.save(
            &account.email,
            account
                .encryption_key
                .as_ref()
                .ok_or(CapstanError::AccountLocked)?,
            100_000_000_000,
        )?;
        Ok(account)
    }
}

fn normalize_email(email: &str) -> eyre::Result<String> {
    let email = email.trim().to_lowercase();
    let well_formed = email.len() >= 5
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        });
    if !well_formed {
        eyre::bail!("invalid account email: {email}");
    }
    Ok(email)
}
