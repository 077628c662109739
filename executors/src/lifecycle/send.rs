use std::sync::Arc;

use alloy::{
    primitives::TxHash,
    transports::{RpcError, TransportErrorKind},
};
use bridge_core::{
    chain::EthereumNetwork, error::AlloyRpcErrorToBridgeError, transaction::SignedTransaction,
};
use serde::{Deserialize, Serialize};

use super::error::TransactionError;

/// What to do when the node answers "nonce too low".
///
/// A sponsored transaction can race the tank's own funding transaction for
/// the node's attention, and some nodes then report a nonce collision for a
/// transaction they did accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NonceCollisionPolicy {
    /// Always report the error.
    Surface,
    /// Treat it as sent when the tank funded the transaction.
    #[default]
    TolerateWhenSponsored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorClassification {
    /// The node already has this exact transaction.
    AlreadyKnown,
    /// Nonce collision that the policy says to ignore.
    ToleratedNonceCollision,
    Failed,
}

pub fn classify_send_error(
    error: &RpcError<TransportErrorKind>,
    sponsored: bool,
    policy: NonceCollisionPolicy,
) -> SendErrorClassification {
    if !error.is_error_resp() {
        return SendErrorClassification::Failed;
    }

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("already known") || error_str.contains("known transaction") {
        return SendErrorClassification::AlreadyKnown;
    }

    if error_str.contains("nonce too low")
        && sponsored
        && policy == NonceCollisionPolicy::TolerateWhenSponsored
    {
        return SendErrorClassification::ToleratedNonceCollision;
    }

    SendErrorClassification::Failed
}

/// Submits signed transactions to the network.
pub struct Broadcaster<N> {
    network: Arc<N>,
    policy: NonceCollisionPolicy,
}

impl<N> Clone for Broadcaster<N> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            policy: self.policy,
        }
    }
}

impl<N: EthereumNetwork> Broadcaster<N> {
    pub fn new(network: Arc<N>, policy: NonceCollisionPolicy) -> Self {
        Self { network, policy }
    }

    #[tracing::instrument(skip_all, fields(tx_hash = %signed.hash(), nonce = signed.nonce(), sponsored))]
    pub async fn submit(
        &self,
        signed: &SignedTransaction,
        sponsored: bool,
    ) -> Result<TxHash, TransactionError> {
        match self.network.send_raw_transaction(signed.raw()).await {
            Ok(hash) => {
                tracing::info!("Transaction sent");
                Ok(hash)
            }
            Err(e) => match classify_send_error(&e, sponsored, self.policy) {
                SendErrorClassification::AlreadyKnown => {
                    tracing::info!(error = %e, "Node already knows the transaction, treating as sent");
                    Ok(signed.hash())
                }
                SendErrorClassification::ToleratedNonceCollision => {
                    tracing::warn!(error = %e, "Ignoring nonce error on sponsored transaction");
                    Ok(signed.hash())
                }
                SendErrorClassification::Failed => {
                    let bridge_error = e.to_bridge_error(self.network.as_ref());
                    Err(TransactionError::BroadcastError {
                        message: bridge_error.to_string(),
                        inner_error: bridge_error,
                    })
                }
            },
        }
    }
}
