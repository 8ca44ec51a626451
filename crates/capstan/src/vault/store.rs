use super::crypto::CryptoBox;
use crate::paths::CapstanPaths;
use eyre::Context as _;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::PathBuf,
};

/// The durable local record for one account. Never contains plaintext
/// keypairs or the encryption key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub use_multi_login: bool,
    /// Password-derived verification key for the remote mirror; present only
    /// when multi-login is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_public_key: Option<String>,
    /// Salt for the password KDF that wraps `access_code`.
    pub kdf_salt_b64: String,
    /// The account encryption key, sealed under the password-derived key.
    pub access_code: CryptoBox,
    /// The keypair list, sealed under the account encryption key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<CryptoBox>,
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    dir: PathBuf,
    lock_path: PathBuf,
}

impl AccountStore {
    pub fn new(paths: &CapstanPaths) -> Self {
        Self {
            dir: paths.accounts_dir(),
            lock_path: paths.lock_path(),
        }
    }

    fn record_path(&self, email: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(email)))
    }

    /// Exclusive lock serializing account writes across processes.
    pub fn acquire_write_lock(&self) -> eyre::Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let f = {
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .mode(0o600)
                    .open(&self.lock_path)
                    .context("open lock file")?
            }
            #[cfg(not(unix))]
            {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&self.lock_path)
                    .context("open lock file")?
            }
        };
        f.lock_exclusive().context("lock exclusive")?;
        Ok(f)
    }

    pub fn release_lock(mut f: File) -> eyre::Result<()> {
        FileExt::unlock(&f).context("unlock")?;
        f.flush().ok();
        Ok(())
    }

    /// Emails of all persisted accounts.
    pub fn enumerate(&self) -> eyre::Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut out = vec![];
        for entry in fs::read_dir(&self.dir).context("read accounts dir")? {
            let entry = entry.context("read accounts dir entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(encoded) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(email) = urlencoding::decode(encoded) else {
                continue;
            };
            out.push(email.into_owned());
        }
        out.sort();
        Ok(out)
    }

    pub fn load(&self, email: &str) -> eyre::Result<Option<AccountRecord>> {
        let p = self.record_path(email);
        if !p.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let rec: AccountRecord =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        Ok(Some(rec))
    }

    pub fn persist(&self, record: &AccountRecord) -> eyre::Result<()> {
        if record.email.is_empty() {
            eyre::bail!("account can't be stored without an email");
        }
        let lock = self.acquire_write_lock()?;
        let s = serde_json::to_string_pretty(record).context("serialize account record")?;
        let res = crate::fsutil::write_string_atomic_restrictive(
            &self.record_path(&record.email),
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write account record");
        Self::release_lock(lock)?;
        res
    }

    pub fn delete(&self, email: &str) -> eyre::Result<()> {
        let p = self.record_path(email);
        if p.exists() {
            let lock = self.acquire_write_lock()?;
            let res = fs::remove_file(&p).with_context(|| format!("remove {}", p.display()));
            Self::release_lock(lock)?;
            res?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::crypto;

    fn store() -> eyre::Result<(tempfile::TempDir, AccountStore)> {
        let tmp = tempfile::tempdir()?;
        let paths = CapstanPaths {
            config_dir: tmp.path().join("config"),
            data_dir: tmp.path().join("data"),
            log_file: tmp.path().join("data/capstan.log.jsonl"),
        };
        let s = AccountStore::new(&paths);
        Ok((tmp, s))
    }

    fn sample_record(email: &str) -> eyre::Result<AccountRecord> {
        let key = crypto::random_key32();
        Ok(AccountRecord {
            email: email.to_owned(),
            avatar: None,
            use_multi_login: false,
            auth_public_key: None,
            kdf_salt_b64: "c2FsdHNhbHRzYWx0c2FsdA==".into(),
            access_code: crypto::encrypt_aes_gcm(&key, b"inner key")?,
            encrypted_data: None,
        })
    }

    #[test]
    fn persist_load_enumerate_delete() -> eyre::Result<()> {
        let (_tmp, store) = store()?;
        assert!(store.enumerate()?.is_empty());

        store.persist(&sample_record("user+tag@example.com")?)?;
        store.persist(&sample_record("another@example.com")?)?;

        assert_eq!(
            store.enumerate()?,
            vec![
                "another@example.com".to_owned(),
                "user+tag@example.com".to_owned()
            ]
        );

        let loaded = store.load("user+tag@example.com")?;
        assert_eq!(
            loaded.map(|r| r.email),
            Some("user+tag@example.com".to_owned())
        );

        store.delete("user+tag@example.com")?;
        assert!(store.load("user+tag@example.com")?.is_none());
        Ok(())
    }
}
