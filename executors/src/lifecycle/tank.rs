use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use bridge_core::{
    chain::EthereumNetwork,
    error::{AlloyRpcErrorToBridgeError, BridgeError},
    rpc_clients::FundingService,
    transaction::SponsorshipRequest,
};

use super::{PollBudget, error::TransactionError};

/// Makes sure an address can pay for gas, asking the gas tank for help when
/// it cannot.
pub struct FundingGateway<N, F> {
    network: Arc<N>,
    service: Arc<F>,
    budget: PollBudget,
}

impl<N, F> Clone for FundingGateway<N, F> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            service: self.service.clone(),
            budget: self.budget,
        }
    }
}

impl<N: EthereumNetwork, F: FundingService> FundingGateway<N, F> {
    pub fn new(network: Arc<N>, service: Arc<F>, budget: PollBudget) -> Self {
        Self {
            network,
            service,
            budget,
        }
    }

    /// Returns `true` when the tank was used to fund `beneficiary`, `false`
    /// when it already held `cost`.
    ///
    /// `on_need_funds` fires before every wait while the balance is short;
    /// `on_funded` fires once when the tank's funds have arrived.
    #[tracing::instrument(skip_all, fields(point = point, beneficiary = %beneficiary, cost = %cost))]
    pub async fn ensure_funds_for(
        &self,
        point: u32,
        beneficiary: Address,
        cost: U256,
        raw_txs: &[Bytes],
        mut on_need_funds: impl FnMut(SponsorshipRequest) + Send,
        on_funded: impl FnOnce() + Send,
    ) -> Result<bool, TransactionError> {
        let mut balance = self
            .network
            .get_balance(beneficiary)
            .await
            .map_err(|e| {
                let bridge_error = e.to_bridge_error(self.network.as_ref());
                TransactionError::ChainFetchError {
                    message: format!("Failed to get balance: {bridge_error}"),
                    inner_error: bridge_error,
                }
            })?;

        if balance >= cost {
            return Ok(false);
        }

        tracing::info!(%balance, "Balance too low, requesting sponsorship");

        self.service
            .request_sponsorship(point, raw_txs)
            .await
            .map_err(|e| {
                let message = match e {
                    BridgeError::SponsorshipRejected { message, .. } => message,
                    other => other.to_string(),
                };
                TransactionError::FundingServiceError { point, message }
            })?;

        let mut attempts = 0;
        loop {
            if balance >= cost {
                tracing::info!(%balance, attempts, "Sponsored funds arrived");
                on_funded();
                return Ok(true);
            }

            on_need_funds(SponsorshipRequest {
                beneficiary,
                minimum_balance: cost,
                current_balance: balance,
            });

            if attempts >= self.budget.max_attempts {
                return Err(TransactionError::FundingTimeoutError {
                    address: beneficiary,
                    minimum_balance: cost,
                    balance,
                });
            }
            attempts += 1;

            tokio::time::sleep(self.budget.interval).await;

            match self.network.get_balance(beneficiary).await {
                Ok(latest) => balance = latest,
                Err(e) => {
                    tracing::warn!(
                        error = %e.to_bridge_error(self.network.as_ref()),
                        attempts,
                        "Failed to poll balance while waiting for sponsorship"
                    );
                }
            }
        }
    }
}
