use capstan::{
    broker::{callback, IntentRequest},
    doctor,
    paths::CapstanPaths,
    store::ConfigStore,
    vault::{AccountKeypair, Vault},
};
use clap::{Parser, Subcommand};
use eyre::Context as _;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::io::Write as _;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "capstan", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Manage locally stored accounts.
    Account {
        #[command(subcommand)]
        cmd: AccountCommand,
    },

    /// Encode an intent request into a confirmation-surface link.
    Link {
        /// Intent name (e.g. `tx`, `pay`, `sign_msg`).
        #[arg(long)]
        intent: String,

        /// Intent parameter as `key=value`; repeatable.
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        #[arg(long, default_value = "Unknown Application")]
        app_name: String,

        #[arg(long, default_value = "No description")]
        app_description: String,

        /// Wrap the query string as a single `encoded=` parameter.
        #[arg(long, default_value_t = false)]
        encoded: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create a new account (prompts for a password).
    Create {
        #[arg(long)]
        email: String,
    },

    /// List stored accounts.
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Add a keypair to an account (prompts for the password and secret key).
    AddKey {
        #[arg(long)]
        email: String,
        /// Friendly name shown in the keypair selector.
        #[arg(long)]
        name: Option<String>,
        /// Generate a fresh random keypair instead of prompting for a seed.
        #[arg(long, default_value_t = false)]
        generate: bool,
    },

    /// Remove a keypair by its account id (prompts for the password).
    RemoveKey {
        #[arg(long)]
        email: String,
        #[arg(long)]
        address: String,
    },

    /// Clear the in-memory session and expire the persisted one.
    SignOut {
        #[arg(long)]
        email: String,
    },
}

fn init_logging(paths: &CapstanPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("capstan.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn open_vault(paths: &CapstanPaths) -> eyre::Result<Vault> {
    let cfg = ConfigStore::new(paths).load_or_init_default()?;
    Ok(Vault::open(paths, cfg.min_password_len, &cfg.signing_salt))
}

fn prompt_password(prompt: &str) -> eyre::Result<SecretString> {
    let pw = rpassword::prompt_password(prompt).context("read password")?;
    Ok(SecretString::new(pw.into()))
}

fn parse_kv_params(raw: &[String]) -> eyre::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for p in raw {
        let Some((k, v)) = p.split_once('=') else {
            eyre::bail!("invalid --param (expected key=value): {p}");
        };
        out.insert(k.to_owned(), v.to_owned());
    }
    Ok(out)
}

fn account_create(paths: &CapstanPaths, email: &str) -> eyre::Result<()> {
    let vault = open_vault(paths)?;
    let password = prompt_password("Password: ")?;
    let confirmation = prompt_password("Confirm password: ")?;
    {
        use secrecy::ExposeSecret as _;
        if password.expose_secret() != confirmation.expose_secret() {
            eyre::bail!("passwords do not match");
        }
    }
    let mut account = vault.create(email, &password)?;
    vault.save(&mut account)?;
    writeln!(std::io::stdout().lock(), "created account {}", account.email)
        .context("write output")?;
    Ok(())
}

fn account_list(paths: &CapstanPaths, json: bool) -> eyre::Result<()> {
    let vault = open_vault(paths)?;
    let accounts = vault.load_accounts()?;
    let mut out = std::io::stdout().lock();
    if json {
        let rows: Vec<serde_json::Value> = accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "email": a.email,
                    "unlocked": a.is_unlocked(),
                    "use_multi_login": a.use_multi_login,
                    "keypairs": a.keypairs().map(<[AccountKeypair]>::len).ok(),
                })
            })
            .collect();
        let s = serde_json::to_string_pretty(&rows).context("serialize accounts")?;
        writeln!(out, "{s}").context("write output")?;
        return Ok(());
    }
    for a in &accounts {
        let state = if a.is_unlocked() { "unlocked" } else { "locked" };
        writeln!(out, "{} ({state})", a.email).context("write output")?;
    }
    Ok(())
}

fn account_add_key(
    paths: &CapstanPaths,
    email: &str,
    name: Option<String>,
    generate: bool,
) -> eyre::Result<()> {
    let vault = open_vault(paths)?;
    let mut account = vault
        .load_account(email)?
        .ok_or_else(|| eyre::eyre!("no stored account for {email}"))?;
    if !account.is_unlocked() {
        let password = prompt_password("Password: ")?;
        vault.unlock(&mut account, &password, 0)?;
    }

    let keypair = if generate {
        AccountKeypair::generate(name)
    } else {
        let secret = rpassword::prompt_password("Secret key: ").context("read secret key")?;
        AccountKeypair::new(secret.trim(), name)
    };
    let address = keypair.address().map_err(|e| eyre::eyre!("{e}"))?;
    vault.add_keypair(&mut account, keypair)?;
    writeln!(std::io::stdout().lock(), "added keypair {address}").context("write output")?;
    Ok(())
}

fn account_remove_key(paths: &CapstanPaths, email: &str, address: &str) -> eyre::Result<()> {
    let vault = open_vault(paths)?;
    let mut account = vault
        .load_account(email)?
        .ok_or_else(|| eyre::eyre!("no stored account for {email}"))?;
    if !account.is_unlocked() {
        let password = prompt_password("Password: ")?;
        vault.unlock(&mut account, &password, 0)?;
    }
    vault.remove_keypair(&mut account, address)?;
    writeln!(std::io::stdout().lock(), "removed keypair {address}").context("write output")?;
    Ok(())
}

fn account_sign_out(paths: &CapstanPaths, email: &str) -> eyre::Result<()> {
    let vault = open_vault(paths)?;
    let mut account = vault
        .load_account(email)?
        .ok_or_else(|| eyre::eyre!("no stored account for {email}"))?;
    vault.sign_out(&mut account)?;
    writeln!(std::io::stdout().lock(), "signed out {email}").context("write output")?;
    Ok(())
}

fn link(
    paths: &CapstanPaths,
    intent: String,
    params: BTreeMap<String, String>,
    app_name: String,
    app_description: String,
    encoded: bool,
) -> eyre::Result<()> {
    let cfg = ConfigStore::new(paths).load_or_init_default()?;
    capstan::intents::validate(&intent, &params).map_err(|e| eyre::eyre!("{e}"))?;

    let request = IntentRequest {
        intent,
        params,
        app_name,
        app_description,
    };
    let query = request.to_query();
    let query = if encoded {
        callback::encode_intent_link(&query)
    } else {
        query
    };
    writeln!(std::io::stdout().lock(), "{}?{query}", cfg.confirm_url())
        .context("write output")?;
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = CapstanPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    match cli.cmd {
        Command::Paths => {
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::Doctor { json } => doctor::run(json).context("doctor failed"),
        Command::Account { cmd } => match cmd {
            AccountCommand::Create { email } => account_create(&paths, &email),
            AccountCommand::List { json } => account_list(&paths, json),
            AccountCommand::AddKey {
                email,
                name,
                generate,
            } => account_add_key(&paths, &email, name, generate),
            AccountCommand::RemoveKey { email, address } => {
                account_remove_key(&paths, &email, &address)
            }
            AccountCommand::SignOut { email } => account_sign_out(&paths, &email),
        },
        Command::Link {
            intent,
            params,
            app_name,
            app_description,
            encoded,
        } => {
            let params = parse_kv_params(&params)?;
            link(&paths, intent, params, app_name, app_description, encoded)
        }
    }
}
