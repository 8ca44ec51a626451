//! Per-confirmation session state.
//!
//! The reference implementation reacted to observable field changes; here
//! the lifecycle is an explicit state machine driven by discrete user
//! actions: parse the request, select an account and keypair, then
//! `confirm()` or `reject()`. Unlock-before-sign ordering falls out of the
//! vault's own state machine, not scheduling.

use super::{callback, responder, ResponseChannel, ResponsePayload};
use crate::{
    config::CapstanConfig,
    errors::CapstanError,
    intents,
    ledger::{
        horizon::{resolve_network, HorizonRpc},
        Keypair,
    },
    strkey,
    vault::{Account, AccountKeypair},
};
use serde_json::{json, Value};
use std::{collections::BTreeMap, path::PathBuf};
use tracing::warn;

#[derive(Debug)]
pub struct ActionContext {
    /// Requested intent name; empty when the request carried none.
    pub intent: String,
    /// Caller-requested public key hint, if any.
    pub requested_pubkey: Option<String>,
    /// Request params, including transport fields.
    pub data: BTreeMap<String, String>,
    /// Origin of the embedding page, derived from the referrer server-side.
    pub app_origin: String,
    /// Relative request path, kept so the surface can re-enter the flow.
    pub confirm_path: String,

    pub selected_account: Option<Account>,
    pub selected_keypair: Option<AccountKeypair>,
    pub confirmed: bool,
    pub intent_errors: Option<CapstanError>,

    audit_log: Option<PathBuf>,
}

impl ActionContext {
    /// Parse the confirmation-surface query string into a fresh context.
    /// Handles the `encoded=` single-parameter wrapper transparently.
    pub fn from_query(query: &str, referrer: Option<&str>) -> Self {
        let confirm_path = format!("/confirm?{query}");
        let mut params = callback::parse_query(query);
        if let Some(encoded) = params.remove("encoded") {
            params = callback::parse_query(&encoded);
        }

        let app_origin = referrer
            .and_then(|r| url::Url::parse(r).ok())
            .map_or_else(|| "origin unknown".to_owned(), |u| u.origin().ascii_serialization());

        let intent = params.remove("intent").unwrap_or_default();
        let requested_pubkey = params.remove("account");
        params
            .entry("app_name".to_owned())
            .or_insert_with(|| "unknown".to_owned());

        let mut ctx = Self {
            intent,
            requested_pubkey,
            data: params,
            app_origin,
            confirm_path,
            selected_account: None,
            selected_keypair: None,
            confirmed: false,
            intent_errors: None,
            audit_log: None,
        };
        ctx.validate();
        ctx
    }

    #[must_use]
    pub fn with_audit_log(mut self, path: PathBuf) -> Self {
        self.audit_log = Some(path);
        self
    }

    fn validate(&mut self) {
        if self.intent.is_empty() {
            self.intent_errors = Some(CapstanError::IntentRequired);
            return;
        }
        if let Some(account) = &self.requested_pubkey {
            if !strkey::is_valid_public_key(account) {
                self.intent_errors = Some(CapstanError::InvalidPublicKeyParam("account".into()));
                return;
            }
        }
        if let Err(e) = intents::validate(&self.intent, &self.data) {
            self.intent_errors = Some(e);
        }
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    pub fn callback(&self) -> Option<&str> {
        self.data.get("callback").map(String::as_str)
    }

    pub fn demo_mode(&self) -> bool {
        self.data.contains_key("demo_mode")
    }

    pub fn select_account(&mut self, account: Account) {
        self.selected_account = Some(account);
    }

    pub fn select_keypair(&mut self, keypair: AccountKeypair) -> Result<(), CapstanError> {
        keypair.validate()?;
        self.selected_keypair = Some(keypair);
        Ok(())
    }

    fn reset(&mut self) {
        self.intent_errors = None;
        self.confirmed = false;
        self.selected_account = None;
        self.selected_keypair = None;
        self.requested_pubkey = None;
    }

    /// The user approved the request: run the intent reaction and deliver
    /// the result through whichever channel the request selected.
    pub async fn confirm(
        &mut self,
        cfg: &CapstanConfig,
        http: &reqwest::Client,
        channel: &impl ResponseChannel,
    ) {
        self.confirmed = true;

        match self.run_reaction(cfg, http).await {
            Ok(mut fields) => {
                fields.insert("intent".to_owned(), json!(self.intent));
                match self.dispatch_response(&fields, http, channel).await {
                    Ok(()) => self.audit("confirmed", None),
                    Err(e) => {
                        self.handle_response_error(&e, channel);
                        self.audit("delivery_failed", Some(e.code()));
                    }
                }
            }
            Err(e) => {
                let e = responder::reaction_error(&self.intent, e);
                self.handle_response_error(&e, channel);
                self.audit("failed", Some(e.code()));
            }
        }

        self.reset();
    }

    /// The user rejected the request, or the surface is bailing out.
    pub fn reject(&mut self, error: Option<CapstanError>, channel: &impl ResponseChannel) {
        let error = error.unwrap_or(CapstanError::RejectedByUser);
        self.handle_response_error(&error, channel);
        self.audit("rejected", Some(error.code()));
        self.reset();
    }

    async fn run_reaction(
        &self,
        cfg: &CapstanConfig,
        http: &reqwest::Client,
    ) -> Result<BTreeMap<String, Value>, CapstanError> {
        if let Some(e) = &self.intent_errors {
            return Err(e.clone());
        }
        let account = self
            .selected_account
            .as_ref()
            .ok_or(CapstanError::RejectedByUser)?;
        let selected = self
            .selected_keypair
            .as_ref()
            .ok_or(CapstanError::EmptySecretKey)?;
        let keypair = Keypair::from_secret(&selected.secret)?;

        if intents::requires_ledger(&self.intent) {
            let network = resolve_network(
                cfg,
                self.data.get("network").map(String::as_str),
                self.data.get("horizon").map(String::as_str),
            )?;
            let rpc = HorizonRpc::new(http.clone(), network);
            responder::respond_ledger(self, &keypair, &rpc, cfg.base_fee).await
        } else {
            responder::respond_local(self, account, &keypair)
        }
    }

    async fn dispatch_response(
        &self,
        fields: &BTreeMap<String, Value>,
        http: &reqwest::Client,
        channel: &impl ResponseChannel,
    ) -> Result<(), CapstanError> {
        match self.callback() {
            Some(cb) => callback::post_callback(http, cb, fields).await,
            None => channel.post_message(ResponsePayload::Fields(fields.clone())),
        }
    }

    /// Degraded delivery for failures: callback flows alert directly (there
    /// is no channel back to a server), window flows post the error unless
    /// the opener is already gone — then a terminal alert is all that's left.
    fn handle_response_error(&self, error: &CapstanError, channel: &impl ResponseChannel) {
        if self.callback().is_some() {
            channel.alert(&error.to_string());
            return;
        }
        let posted = channel.post_message(ResponsePayload::Error {
            error: error.into(),
        });
        if let Err(e) = posted {
            warn!(error = %e, "no opener to deliver the rejection to");
            channel.alert(&format!(
                "Unable to process. Parent browsing context was closed. {error}"
            ));
        }
    }

    fn audit(&self, result: &str, error_code: Option<u16>) {
        let Some(path) = &self.audit_log else {
            return;
        };
        let entry = json!({
            "intent": if self.intent.is_empty() { Value::Null } else { json!(self.intent) },
            "app_origin": self.app_origin,
            "email": self.selected_account.as_ref().map(|a| a.email.clone()),
            "result": result,
            "error_code": error_code,
        });
        if let Err(e) = crate::audit::append_entry(path, &entry) {
            warn!(error = %e, "failed to append audit entry");
        }
    }
}
