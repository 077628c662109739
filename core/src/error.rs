use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::EthereumNetwork;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcErrorKind {
    /// Server returned an error response.
    #[error("server returned an error response: {0}")]
    ErrorResp(RpcErrorResponse),

    /// Server returned a null response when a non-null response was expected.
    #[error("server returned a null response when a non-null response was expected")]
    NullResp,

    /// Rpc server returned an unsupported feature.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Returned when a local pre-processing step fails.
    #[error("local usage error: {message}")]
    InternalError { message: String },

    /// JSON serialization error.
    #[error("serialization error: {message}")]
    SerError {
        // sourced from serde_json::Error
        message: String,
    },

    /// JSON deserialization error.
    #[error("deserialization error: {message}, text: {text}")]
    DeserError {
        // sourced from serde_json::Error
        message: String,
        /// The text that failed to deserialize.
        text: String,
    },

    #[error("HTTP error {status}")]
    TransportHttpError { status: u16, body: String },

    #[error("Other transport error: {message}")]
    OtherTransportError { message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcErrorResponse {
    /// The error code.
    pub code: i64,
    /// The error message (if any).
    pub message: String,
    /// The error data (if any).
    pub data: Option<String>,
}

impl std::fmt::Display for RpcErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "code {}: {}{}",
            self.code,
            self.message,
            self.data
                .as_ref()
                .map(|data| format!(", data: {data}"))
                .unwrap_or_default()
        )
    }
}

#[derive(Error, Debug, Serialize, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum BridgeError {
    #[error("RPC error at {rpc_url}: {message}")]
    RpcError {
        rpc_url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Funding service error at {url}: {message}")]
    TankError {
        url: String,
        message: String,
        kind: RpcErrorKind,
    },

    #[error("Funding service declined to sponsor point {point}: {message}")]
    SponsorshipRejected { point: u32, message: String },

    #[error("Bad RPC configuration: {message}")]
    RpcConfigError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

pub trait AlloyRpcErrorToBridgeError {
    fn to_bridge_error(&self, network: &impl EthereumNetwork) -> BridgeError;
    fn to_bridge_tank_error(&self, tank_url: &str) -> BridgeError;
}

fn to_bridge_rpc_error_kind(err: &AlloyRpcError<TransportErrorKind>) -> RpcErrorKind {
    match err {
        AlloyRpcError::ErrorResp(err) => RpcErrorKind::ErrorResp(RpcErrorResponse {
            code: err.code,
            message: err.message.to_string(),
            data: err.data.as_ref().map(|data| data.to_string()),
        }),
        AlloyRpcError::NullResp => RpcErrorKind::NullResp,
        AlloyRpcError::UnsupportedFeature(feature) => RpcErrorKind::UnsupportedFeature {
            message: feature.to_string(),
        },
        AlloyRpcError::LocalUsageError(err) => RpcErrorKind::InternalError {
            message: err.to_string(),
        },
        AlloyRpcError::SerError(err) => RpcErrorKind::SerError {
            message: err.to_string(),
        },
        AlloyRpcError::DeserError { err, text } => RpcErrorKind::DeserError {
            message: err.to_string(),
            text: text.to_string(),
        },
        AlloyRpcError::Transport(err) => match err {
            TransportErrorKind::HttpError(err) => RpcErrorKind::TransportHttpError {
                status: err.status,
                body: err.body.to_string(),
            },
            _ => RpcErrorKind::OtherTransportError {
                message: err.to_string(),
            },
        },
    }
}

impl AlloyRpcErrorToBridgeError for AlloyRpcError<TransportErrorKind> {
    fn to_bridge_error(&self, network: &impl EthereumNetwork) -> BridgeError {
        BridgeError::RpcError {
            rpc_url: network.rpc_url(),
            message: self.to_string(),
            kind: to_bridge_rpc_error_kind(self),
        }
    }

    fn to_bridge_tank_error(&self, tank_url: &str) -> BridgeError {
        BridgeError::TankError {
            url: tank_url.to_string(),
            message: self.to_string(),
            kind: to_bridge_rpc_error_kind(self),
        }
    }
}

impl From<alloy::signers::local::LocalSignerError> for BridgeError {
    fn from(err: alloy::signers::local::LocalSignerError) -> Self {
        BridgeError::ValidationError {
            message: format!("Invalid private key: {err}"),
        }
    }
}
