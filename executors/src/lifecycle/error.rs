use alloy::primitives::{Address, TxHash, U256};
use bridge_core::{error::BridgeError, signer::SigningError};
use serde::{Deserialize, Serialize};

/// Everything that can land in a transaction attempt's error slot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum TransactionError {
    #[error("Failed to load chain context: {message}")]
    ChainFetchError {
        message: String,
        inner_error: BridgeError,
    },

    #[error("Failed to build transaction: {message}")]
    IntentBuilderError { message: String },

    #[error("Transaction signing failed: {kind}")]
    SigningError { kind: SigningError },

    #[error("{address} still has {balance} wei after waiting for {minimum_balance} wei")]
    FundingTimeoutError {
        address: Address,
        minimum_balance: U256,
        balance: U256,
    },

    #[error("Funding service error for point {point}: {message}")]
    FundingServiceError { point: u32, message: String },

    #[error("Error encountered when broadcasting transaction: {message}")]
    BroadcastError {
        message: String,
        inner_error: BridgeError,
    },

    #[error("Transaction {tx_hash} was not confirmed after {attempts} attempts")]
    ConfirmationTimeoutError { tx_hash: TxHash, attempts: u32 },

    #[error("Transaction {tx_hash} reverted")]
    TransactionReverted {
        tx_hash: TxHash,
        block_number: Option<u64>,
    },

    /// The original failure is kept in `message`; the display text is what
    /// the user sees.
    #[error(
        "The transaction succeeded but we were unable to refresh chain state. Refresh to continue."
    )]
    RefetchError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl TransactionError {
    /// Stable label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::ChainFetchError { .. } => "CHAIN_FETCH_ERROR",
            TransactionError::IntentBuilderError { .. } => "INTENT_BUILDER_ERROR",
            TransactionError::SigningError { .. } => "SIGNING_ERROR",
            TransactionError::FundingTimeoutError { .. } => "FUNDING_TIMEOUT_ERROR",
            TransactionError::FundingServiceError { .. } => "FUNDING_SERVICE_ERROR",
            TransactionError::BroadcastError { .. } => "BROADCAST_ERROR",
            TransactionError::ConfirmationTimeoutError { .. } => "CONFIRMATION_TIMEOUT_ERROR",
            TransactionError::TransactionReverted { .. } => "TRANSACTION_REVERTED",
            TransactionError::RefetchError { .. } => "REFETCH_ERROR",
            TransactionError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Errors that leave the attempt able to reach COMPLETED.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransactionError::RefetchError { .. })
    }
}

impl From<SigningError> for TransactionError {
    fn from(kind: SigningError) -> Self {
        TransactionError::SigningError { kind }
    }
}
