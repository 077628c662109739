use std::future::Future;

use alloy::{
    primitives::{Bytes, TxHash},
    rpc::client::RpcClient,
    transports::{TransportResult, http::reqwest::Url},
};
use serde::{Deserialize, Serialize};

use crate::error::{AlloyRpcErrorToBridgeError, BridgeError};

/// Answer from the gas tank to a funding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TankResponse {
    pub success: bool,
    /// Hash of the transaction that moved funds to the beneficiary, if any.
    #[serde(default)]
    pub tx_hash: Option<TxHash>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Third-party service that pays gas for transactions executed on behalf of
/// a point.
pub trait FundingService: Send + Sync {
    fn url(&self) -> String;

    /// Asks the service to top up the sender of `raw_txs`. Declined requests
    /// are errors; a successful request only means funds are on their way.
    fn request_sponsorship(
        &self,
        point: u32,
        raw_txs: &[Bytes],
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

/// A JSON-RPC client for the gas tank service
#[derive(Debug, Clone)]
pub struct TankClient {
    pub inner: RpcClient,
    url: Url,
}

impl TankClient {
    pub fn new(url: &str) -> Result<Self, BridgeError> {
        let url = Url::parse(url).map_err(|e| BridgeError::RpcConfigError {
            message: format!("Failed to parse tank URL: {e}"),
        })?;

        Ok(Self {
            inner: RpcClient::new_http(url.clone()),
            url,
        })
    }

    /// Submit signed transactions for sponsorship
    pub async fn fund_transactions(
        &self,
        point: u32,
        raw_txs: &[Bytes],
    ) -> TransportResult<TankResponse> {
        self.inner
            .request("fundTransactions", (point, raw_txs.to_vec()))
            .await
    }
}

impl FundingService for TankClient {
    fn url(&self) -> String {
        self.url.to_string()
    }

    async fn request_sponsorship(&self, point: u32, raw_txs: &[Bytes]) -> Result<(), BridgeError> {
        let response = self
            .fund_transactions(point, raw_txs)
            .await
            .map_err(|e| e.to_bridge_tank_error(self.url.as_str()))?;

        if !response.success {
            return Err(BridgeError::SponsorshipRejected {
                point,
                message: response
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        tracing::debug!(
            point = point,
            funding_tx = ?response.tx_hash,
            "Tank accepted sponsorship request"
        );
        Ok(())
    }
}
