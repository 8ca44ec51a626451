//! Quick self-diagnostic: resolved paths, config health, account count.
//! Safe to paste into a bug report; contains no secrets.

use crate::{paths::CapstanPaths, store::ConfigStore, vault::Vault};
use eyre::Context as _;
use serde_json::json;
use std::io::Write as _;

pub fn run(json_output: bool) -> eyre::Result<()> {
    let paths = CapstanPaths::discover()?;
    paths.ensure_private_dirs()?;

    let cfg_store = ConfigStore::new(&paths);
    let (config_ok, config_error, cfg) = match cfg_store.load_or_init_default() {
        Ok(cfg) => (true, None, Some(cfg)),
        Err(e) => (false, Some(e.to_string()), None),
    };

    let accounts = cfg.as_ref().map_or(0, |c| {
        let vault = Vault::open(&paths, c.min_password_len, &c.signing_salt);
        vault.load_accounts().map_or(0, |a| a.len())
    });

    let networks: Vec<String> = cfg
        .as_ref()
        .map(|c| c.networks.keys().cloned().collect())
        .unwrap_or_default();

    let report = json!({
        "ok": config_ok,
        "version": env!("CARGO_PKG_VERSION"),
        "paths": {
            "config_dir": paths.config_dir,
            "data_dir": paths.data_dir,
            "log_file": paths.log_file,
        },
        "config_ok": config_ok,
        "config_error": config_error,
        "accounts": accounts,
        "networks": networks,
        "session_master_present": paths.session_master_path().exists(),
        "audit_log_present": paths.audit_log_path().exists(),
    });

    let mut out = std::io::stdout().lock();
    if json_output {
        writeln!(out, "{report}").context("write doctor report")?;
        return Ok(());
    }

    writeln!(out, "capstan {}", env!("CARGO_PKG_VERSION")).context("write doctor report")?;
    writeln!(out, "  config dir:  {}", paths.config_dir.display()).context("write doctor report")?;
    writeln!(out, "  data dir:    {}", paths.data_dir.display()).context("write doctor report")?;
    writeln!(
        out,
        "  config:      {}",
        if config_ok { "ok" } else { "FAILED" }
    )
    .context("write doctor report")?;
    if let Some(err) = report.get("config_error").and_then(|v| v.as_str()) {
        writeln!(out, "               {err}").context("write doctor report")?;
    }
    writeln!(out, "  accounts:    {accounts}").context("write doctor report")?;
    writeln!(out, "  networks:    {}", networks.join(", ")).context("write doctor report")?;
    Ok(())
}
