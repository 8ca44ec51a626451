use crate::{config::CapstanConfig, paths::CapstanPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config.
fn apply_env_overrides(cfg: &mut CapstanConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("CAPSTAN_SERVICE_URL", |v| {
        v.clone_into(&mut cfg.service_url);
    });
    apply_env("CAPSTAN_SIGNING_SALT", |v| {
        v.clone_into(&mut cfg.signing_salt);
    });
    apply_env("CAPSTAN_HORIZON_PUBLIC", |v| {
        if let Some(n) = cfg.networks.get_mut("public") {
            v.clone_into(&mut n.horizon);
        }
    });
    apply_env("CAPSTAN_HORIZON_TESTNET", |v| {
        if let Some(n) = cfg.networks.get_mut("testnet") {
            v.clone_into(&mut n.horizon);
        }
    });
    if let Ok(v) = std::env::var("CAPSTAN_RESPONSE_TIMEOUT_SECONDS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            cfg.response_timeout_seconds = n;
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &CapstanPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<CapstanConfig> {
        if !self.path.exists() {
            let mut cfg = CapstanConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: CapstanConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &CapstanConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
