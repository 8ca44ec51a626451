use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every failure the broker can surface to a caller, with a stable numeric
/// code so relying applications can branch without string matching.
///
/// Codes 1xx are credential errors kept compatible with the original wire
/// contract; 2xx are validation, 3xx protocol, 4xx network/ledger.
#[derive(Debug, Error, Clone)]
pub enum CapstanError {
    #[error("Error occurred. If this error persists, please contact our support team.")]
    Generic,

    #[error("Action was rejected by user")]
    RejectedByUser,

    #[error("Invalid secret key. Please check if you copied it correctly.")]
    InvalidSecretKey,

    #[error("Secret key is required.")]
    EmptySecretKey,

    #[error("Invalid password format. Please provide a valid password.")]
    InvalidPasswordFormat,

    #[error("Invalid account password. Please provide a valid password.")]
    InvalidPassword,

    #[error("Error decrypting account. Encrypted secret key not found.")]
    EncryptedDataNotFound,

    #[error("Account is locked. Unlock it first.")]
    AccountLocked,

    #[error("Parameter \"intent\" is required.")]
    IntentRequired,

    #[error("Unknown intent \"{0}\".")]
    UnknownIntent(String),

    #[error("Parameter \"{param}\" is required for intent \"{intent}\".")]
    MissingParam { param: String, intent: String },

    #[error("Invalid \"{0}\" parameter. Account public key expected.")]
    InvalidPublicKeyParam(String),

    #[error("Invalid data.")]
    InvalidData,

    #[error("Another intent request is already pending.")]
    RequestPending,

    #[error("Parent browsing context was closed.")]
    ParentContextClosed,

    #[error("Unsupported callback schema: {0}")]
    UnsupportedCallbackSchema(String),

    #[error("Response channel was dropped before a response arrived.")]
    ChannelClosed,

    #[error("Intent request timed out.")]
    RequestTimeout,

    #[error("Parameter \"horizon\" is required for the non-standard networks.")]
    HorizonRequired,

    #[error("Network error.")]
    NetworkError,

    #[error("Account does not exist on the network {0}.")]
    AccountNotFound(String),

    #[error("Transaction failed.")]
    TransactionFailed { details: Value },

    #[error("Failed to sign an authentication token.")]
    AuthenticationSigningFailed,

    #[error("Failed to sign a message.")]
    MessageSigningFailed,

    #[error("Invalid message signature.")]
    InvalidMessageSignature,

    #[error("Failed to process the transaction.")]
    TransactionProcessingFailed,
}

impl CapstanError {
    pub const fn code(&self) -> u16 {
        match self {
            Self::Generic => 0,
            Self::RejectedByUser => 1,
            Self::InvalidSecretKey => 101,
            Self::EmptySecretKey => 102,
            Self::InvalidPasswordFormat => 103,
            Self::InvalidPassword => 104,
            Self::EncryptedDataNotFound => 105,
            Self::AccountLocked => 106,
            Self::IntentRequired
            | Self::UnknownIntent(_)
            | Self::MissingParam { .. }
            | Self::InvalidPublicKeyParam(_) => 201,
            Self::InvalidData => 202,
            Self::RequestPending => 301,
            Self::ParentContextClosed => 302,
            Self::UnsupportedCallbackSchema(_) => 303,
            Self::ChannelClosed => 304,
            Self::RequestTimeout => 305,
            Self::HorizonRequired => 401,
            Self::NetworkError => 402,
            Self::AccountNotFound(_) => 403,
            Self::TransactionFailed { .. } => 404,
            Self::AuthenticationSigningFailed => 405,
            Self::MessageSigningFailed => 406,
            Self::InvalidMessageSignature => 407,
            Self::TransactionProcessingFailed => 408,
        }
    }

    /// RPC error bodies are forwarded verbatim for caller-side diagnostics.
    pub const fn details(&self) -> Option<&Value> {
        match self {
            Self::TransactionFailed { details } => Some(details),
            _ => None,
        }
    }
}

/// Serializable form delivered over the response channel / callback POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub details: Value,
}

impl From<&CapstanError> for ErrorPayload {
    fn from(e: &CapstanError) -> Self {
        Self {
            message: e.to_string(),
            code: e.code(),
            details: e.details().cloned().unwrap_or(Value::Null),
        }
    }
}

impl From<CapstanError> for ErrorPayload {
    fn from(e: CapstanError) -> Self {
        Self::from(&e)
    }
}
