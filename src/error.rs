//! Closed error taxonomy shared by every component (spec §7).
//!
//! Component-local failures are converted to one of these variants at the
//! component boundary; nothing upstream ever sees a bare `anyhow::Error`
//! except the outermost admin-handler glue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient funds: need {needed}, available {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    #[error("no available vtxo for asset {asset_id} amount {amount}")]
    NoAvailableVtxo { asset_id: String, amount: u128 },

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("session expired: {session_id}")]
    SessionExpired { session_id: String },

    #[error("challenge expired or used: {challenge_id}")]
    ChallengeExpired { challenge_id: String },

    #[error("signing ceremony failed at step {step}: {reason}")]
    SigningCeremony { step: String, reason: String },

    #[error("signing ceremony timed out: {0}")]
    SigningTimeout(String),

    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("no route to destination")]
    RouteNotFound,

    #[error("insufficient lightning balance")]
    InsufficientLightningBalance,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("adapter unavailable: {0}")]
    Unavailable(String),
    #[error("adapter timed out: {0}")]
    Timeout(String),
    #[error("adapter protocol error: {0}")]
    ProtocolError(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<sled::Error> for GatewayError {
    fn from(e: sled::Error) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for GatewayError {
    fn from(e: bincode::Error) -> Self {
        GatewayError::Storage(e.to_string())
    }
}
