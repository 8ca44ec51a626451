//! Capstan: an embeddable identity/signing broker.
//!
//! A relying application uses the [`sdk::IntentClient`] to request one of a
//! fixed set of intents; the confirmation surface (a separate browsing
//! context on the trusted origin) drives an [`broker::context::ActionContext`]
//! against the user's [`vault::Vault`], and the result travels back through
//! the [`broker::Broker`] or an HTTP form-post callback. Private keys only
//! ever exist in plaintext inside an unlocked vault session.

pub mod amount;
pub mod audit;
pub mod broker;
pub mod config;
pub mod doctor;
pub mod errors;
pub mod fsutil;
pub mod intents;
pub mod ledger;
pub mod paths;
pub mod sdk;
pub mod signer;
pub mod store;
pub mod strkey;
pub mod vault;
