use std::process::Command;

use eyre::Context as _;

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let exe = assert_cmd::cargo::cargo_bin!("capstan");

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(exe)
        .env("CAPSTAN_CONFIG_DIR", cfg_dir.path())
        .env("CAPSTAN_DATA_DIR", data_dir.path())
        .args(["doctor", "--json"])
        .output()
        .context("run capstan doctor --json")?;

    assert!(
        out.status.success(),
        "doctor exited non-zero: status={:?}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse doctor json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some());
    assert_eq!(
        v.get("accounts").and_then(serde_json::Value::as_u64),
        Some(0)
    );
    Ok(())
}

#[test]
fn link_encodes_a_confirmation_url() -> eyre::Result<()> {
    use predicates::prelude::*;

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let mut cmd = assert_cmd::Command::cargo_bin("capstan").context("find capstan binary")?;
    cmd.env("CAPSTAN_CONFIG_DIR", cfg_dir.path())
        .env("CAPSTAN_DATA_DIR", data_dir.path())
        .args([
            "link",
            "--intent",
            "sign_msg",
            "--param",
            "message=hello world",
            "--app-name",
            "Demo App",
        ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("/confirm?intent=sign_msg"))
        .stdout(predicate::str::contains("message=hello+world"))
        .stdout(predicate::str::contains("app_name=Demo+App"));
    Ok(())
}

#[test]
fn link_rejects_unknown_intents() -> eyre::Result<()> {
    use predicates::prelude::*;

    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let mut cmd = assert_cmd::Command::cargo_bin("capstan").context("find capstan binary")?;
    cmd.env("CAPSTAN_CONFIG_DIR", cfg_dir.path())
        .env("CAPSTAN_DATA_DIR", data_dir.path())
        .args(["link", "--intent", "not_real"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown intent"));
    Ok(())
}
