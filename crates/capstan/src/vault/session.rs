//! Time-boxed, password-free re-entry credentials.
//!
//! A session stores the account's encryption key sealed under a subkey of a
//! locally generated session master secret. The master secret never leaves
//! the device, so a leaked session record alone recovers nothing.

use super::crypto::{self, CryptoBox};
use crate::paths::CapstanPaths;
use chrono::{DateTime, Utc};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::PathBuf,
};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    email: String,
    expires_at: DateTime<Utc>,
    key: CryptoBox,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    master_path: PathBuf,
}

impl SessionStore {
    pub fn new(paths: &CapstanPaths) -> Self {
        Self {
            dir: paths.sessions_dir(),
            master_path: paths.session_master_path(),
        }
    }

    fn session_path(&self, email: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(email)))
    }

    /// Load or create the device-local session master secret.
    pub fn ensure_master_secret(&self) -> eyre::Result<Zeroizing<[u8; 32]>> {
        if self.master_path.exists() {
            let buf = fs::read(&self.master_path).context("read session master secret")?;
            if buf.len() != 32 {
                eyre::bail!("session master secret wrong length");
            }
            let mut out = Zeroizing::new([0_u8; 32]);
            out.copy_from_slice(&buf);
            return Ok(out);
        }

        let mut secret = Zeroizing::new([0_u8; 32]);
        crypto::fill_random(secret.as_mut());

        if let Some(parent) = self.master_path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.master_path)
                .context("create session master secret")?;
            f.write_all(secret.as_ref())
                .context("write session master secret")?;
        }
        #[cfg(not(unix))]
        {
            fs::write(&self.master_path, secret.as_ref())
                .context("write session master secret")?;
        }

        Ok(secret)
    }

    /// Persist a session for `email`, valid for `duration_seconds` from now.
    pub fn save(
        &self,
        email: &str,
        encryption_key: &[u8; 32],
        duration_seconds: u64,
    ) -> eyre::Result<()> {
        if duration_seconds == 0 {
            return Ok(());
        }
        let master = self.ensure_master_secret()?;
        let wrap = crypto::derive_subkey(&master, email, "session")?;
        let sealed = crypto::encrypt_aes_gcm(&wrap, encryption_key)?;

        let seconds = i64::try_from(duration_seconds).unwrap_or(i64::MAX);
        let record = SessionRecord {
            email: email.to_owned(),
            expires_at: Utc::now() + chrono::Duration::seconds(seconds),
            key: sealed,
        };
        let s = serde_json::to_string_pretty(&record).context("serialize session")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.session_path(email),
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write session")?;
        Ok(())
    }

    /// Recover the encryption key from an unexpired session, if any.
    /// Expired or undecipherable sessions are removed on the way.
    pub fn restore(&self, email: &str) -> eyre::Result<Option<Zeroizing<[u8; 32]>>> {
        let p = self.session_path(email);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let Ok(record) = serde_json::from_str::<SessionRecord>(&s) else {
            drop(fs::remove_file(&p));
            return Ok(None);
        };

        if record.expires_at <= Utc::now() {
            drop(fs::remove_file(&p));
            return Ok(None);
        }

        let master = self.ensure_master_secret()?;
        let wrap = crypto::derive_subkey(&master, email, "session")?;
        let Ok(raw) = crypto::decrypt_aes_gcm(&wrap, &record.key) else {
            drop(fs::remove_file(&p));
            return Ok(None);
        };
        if raw.len() != 32 {
            drop(fs::remove_file(&p));
            return Ok(None);
        }
        let mut out = Zeroizing::new([0_u8; 32]);
        out.copy_from_slice(&raw);
        Ok(Some(out))
    }

    pub fn expire(&self, email: &str) -> eyre::Result<()> {
        let p = self.session_path(email);
        if p.exists() {
            fs::remove_file(&p).with_context(|| format!("remove {}", p.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> eyre::Result<(tempfile::TempDir, SessionStore)> {
        let tmp = tempfile::tempdir()?;
        let paths = CapstanPaths {
            config_dir: tmp.path().join("config"),
            data_dir: tmp.path().join("data"),
            log_file: tmp.path().join("data/capstan.log.jsonl"),
        };
        let s = SessionStore::new(&paths);
        Ok((tmp, s))
    }

    #[test]
    fn save_and_restore_round_trip() -> eyre::Result<()> {
        let (_tmp, store) = store()?;
        let key = crypto::random_key32();
        store.save("user@example.com", &key, 600)?;

        let restored = store.restore("user@example.com")?;
        assert_eq!(restored.as_deref(), Some(&key));

        store.expire("user@example.com")?;
        assert!(store.restore("user@example.com")?.is_none());
        Ok(())
    }

    #[test]
    fn zero_duration_saves_nothing() -> eyre::Result<()> {
        let (_tmp, store) = store()?;
        let key = crypto::random_key32();
        store.save("user@example.com", &key, 0)?;
        assert!(store.restore("user@example.com")?.is_none());
        Ok(())
    }

    #[test]
    fn master_secret_is_stable_across_opens() -> eyre::Result<()> {
        let (_tmp, store) = store()?;
        let a = store.ensure_master_secret()?;
        let b = store.ensure_master_secret()?;
        assert_eq!(a.as_ref(), b.as_ref());
        Ok(())
    }
}
