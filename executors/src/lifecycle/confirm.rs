use std::sync::Arc;

use alloy::primitives::TxHash;
use bridge_core::{
    chain::{EthereumNetwork, ReceiptSummary},
    error::AlloyRpcErrorToBridgeError,
};

use super::{PollBudget, error::TransactionError};

/// Polls for a receipt until the transaction is mined or the budget runs out.
pub struct ConfirmationTracker<N> {
    network: Arc<N>,
    budget: PollBudget,
}

impl<N> Clone for ConfirmationTracker<N> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            budget: self.budget,
        }
    }
}

impl<N: EthereumNetwork> ConfirmationTracker<N> {
    pub fn new(network: Arc<N>, budget: PollBudget) -> Self {
        Self { network, budget }
    }

    #[tracing::instrument(skip_all, fields(tx_hash = %hash))]
    pub async fn wait_for_confirmation(
        &self,
        hash: TxHash,
    ) -> Result<ReceiptSummary, TransactionError> {
        for attempt in 1..=self.budget.max_attempts {
            match self.network.get_receipt(hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    tracing::info!(
                        attempt,
                        block_number = ?receipt.block_number,
                        gas_used = receipt.gas_used,
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(Some(receipt)) => {
                    return Err(TransactionError::TransactionReverted {
                        tx_hash: hash,
                        block_number: receipt.block_number,
                    });
                }
                Ok(None) => {
                    tracing::debug!(attempt, "Receipt not available yet");
                }
                // A flaky node should not fail an already broadcast transaction
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e.to_bridge_error(self.network.as_ref()),
                        "Failed to fetch receipt"
                    );
                }
            }

            if attempt < self.budget.max_attempts {
                tokio::time::sleep(self.budget.interval).await;
            }
        }

        Err(TransactionError::ConfirmationTimeoutError {
            tx_hash: hash,
            attempts: self.budget.max_attempts,
        })
    }
}
