use std::future::Future;

use alloy::{
    network::ReceiptResponse,
    primitives::{Address, TxHash, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    transports::{TransportResult, http::reqwest::Url},
};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Which Ethereum network the wallet is pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Local,
    Testnet,
    Mainnet,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Local => "local",
            NetworkType::Testnet => "testnet",
            NetworkType::Mainnet => "mainnet",
        }
    }
}

/// What the lifecycle needs to know about a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

/// Network primitives consumed by the transaction lifecycle.
///
/// The connection is a read-only shared resource; implementations must be
/// cheap to share behind an `Arc`.
pub trait EthereumNetwork: Send + Sync {
    fn rpc_url(&self) -> String;
    fn network_type(&self) -> NetworkType;

    fn get_transaction_count(
        &self,
        address: Address,
    ) -> impl Future<Output = TransportResult<u64>> + Send;

    fn get_chain_id(&self) -> impl Future<Output = TransportResult<u64>> + Send;

    fn get_balance(&self, address: Address) -> impl Future<Output = TransportResult<U256>> + Send;

    /// Current network gas price in wei.
    fn get_gas_price(&self) -> impl Future<Output = TransportResult<u128>> + Send;

    fn send_raw_transaction(
        &self,
        raw_transaction: &[u8],
    ) -> impl Future<Output = TransportResult<TxHash>> + Send;

    /// `None` while the transaction has not been mined.
    fn get_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = TransportResult<Option<ReceiptSummary>>> + Send;
}

pub struct NetworkConfig<'a> {
    pub rpc_url: &'a str,
    pub network_type: NetworkType,
}

impl NetworkConfig<'_> {
    pub fn to_network(&self) -> Result<ProviderNetwork, BridgeError> {
        let rpc_url = Url::parse(self.rpc_url).map_err(|e| BridgeError::RpcConfigError {
            message: format!("Failed to parse RPC URL: {e}"),
        })?;

        Ok(ProviderNetwork {
            provider: ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_http(rpc_url.clone()),
            rpc_url,
            network_type: self.network_type,
        })
    }
}

/// [`EthereumNetwork`] backed by an alloy HTTP provider.
#[derive(Clone)]
pub struct ProviderNetwork {
    pub provider: RootProvider,
    rpc_url: Url,
    network_type: NetworkType,
}

impl EthereumNetwork for ProviderNetwork {
    fn rpc_url(&self) -> String {
        self.rpc_url.to_string()
    }

    fn network_type(&self) -> NetworkType {
        self.network_type
    }

    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64> {
        self.provider.get_transaction_count(address).await
    }

    async fn get_chain_id(&self) -> TransportResult<u64> {
        self.provider.get_chain_id().await
    }

    async fn get_balance(&self, address: Address) -> TransportResult<U256> {
        self.provider.get_balance(address).await
    }

    async fn get_gas_price(&self) -> TransportResult<u128> {
        self.provider.get_gas_price().await
    }

    async fn send_raw_transaction(&self, raw_transaction: &[u8]) -> TransportResult<TxHash> {
        let pending = self.provider.send_raw_transaction(raw_transaction).await?;
        Ok(*pending.tx_hash())
    }

    async fn get_receipt(&self, hash: TxHash) -> TransportResult<Option<ReceiptSummary>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;

        Ok(receipt.map(|receipt| ReceiptSummary {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            success: receipt.status(),
        }))
    }
}
