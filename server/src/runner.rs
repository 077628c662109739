use std::sync::Arc;

use alloy::primitives::{Address, U256};
use bridge_core::{
    chain::{EthereumNetwork, NetworkConfig, ProviderNetwork},
    error::{AlloyRpcErrorToBridgeError, BridgeError},
    rpc_clients::TankClient,
    signer::{NoDevice, TransactionSigner, WalletSigner},
    transaction::TransactionIntent,
};
use bridge_executors::{
    IntentBuilder, Phase, TransactionController, TransactionError, intent_builder,
    metrics::export_default_metrics, refetch_fn,
};

use crate::config::BridgeConfig;

pub type TransferController =
    TransactionController<TransferArgs, ProviderNetwork, WalletSigner>;

#[derive(Debug, Clone, Copy)]
pub struct TransferArgs {
    pub to: Address,
    pub value: U256,
}

/// Builds a plain ETH transfer, refusing the zero address.
pub fn transfer_builder() -> IntentBuilder<TransferArgs> {
    intent_builder(|args: TransferArgs| async move {
        if args.to == Address::ZERO {
            return Err(BridgeError::ValidationError {
                message: "refusing to send to the zero address".to_string(),
            });
        }
        Ok::<_, BridgeError>(TransactionIntent::transfer(args.to, args.value))
    })
}

pub fn build_controller(config: &BridgeConfig) -> anyhow::Result<TransferController> {
    let network = Arc::new(
        NetworkConfig {
            rpc_url: &config.network.rpc_url,
            network_type: config.network.network_type,
        }
        .to_network()?,
    );
    tracing::info!(
        rpc_url = %network.rpc_url(),
        network = network.network_type().as_str(),
        "Network client initialized"
    );

    let signer = Arc::new(WalletSigner::<NoDevice>::from_credential(
        config.wallet.credential()?,
        None,
    )?);
    let address = signer.address();
    tracing::info!(%address, strategy = %signer.strategy(), "Wallet loaded");

    let refetch = refetch_fn({
        let network = network.clone();
        move || {
            let network = network.clone();
            async move {
                let balance = network
                    .get_balance(address)
                    .await
                    .map_err(|e| e.to_bridge_error(network.as_ref()))?;
                tracing::info!(%address, %balance, "Refreshed wallet balance");
                Ok::<_, BridgeError>(())
            }
        }
    });

    let mut controller = TransactionController::new(
        network,
        signer,
        transfer_builder(),
        config.lifecycle_config(),
    )
    .with_refetch(refetch);

    if let Some(tank) = &config.tank {
        let client = TankClient::new(&tank.url)?;
        tracing::info!(url = %tank.url, "Gas tank client initialized");
        controller = controller.with_funding_service(Arc::new(client));
    }

    Ok(controller)
}

/// Takes one transfer from a fresh attempt all the way to COMPLETED.
pub async fn run_transfer(
    controller: &TransferController,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    let progress = tokio::spawn(log_progress(controller.subscribe()));

    let result = drive(controller, config).await;
    progress.abort();

    match export_default_metrics() {
        Ok(metrics) => tracing::debug!(%metrics, "Lifecycle metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to export metrics"),
    }

    result
}

async fn drive(controller: &TransferController, config: &BridgeConfig) -> anyhow::Result<()> {
    controller.initialize().await?;
    halt_on_error(controller)?;

    controller
        .construct(TransferArgs {
            to: config.transfer.to,
            value: config.transfer.value_wei,
        })
        .await?;
    halt_on_error(controller)?;
    controller.set_point_cursor(config.transfer.point)?;

    controller.generate_and_sign().await?;
    halt_on_error(controller)?;
    if let Some(signed) = controller.signed_transaction() {
        tracing::info!(tx_hash = %signed.hash(), raw = %signed.hexify(), "Signed transaction");
    }

    controller.broadcast().await?;
    halt_on_error(controller)?;

    if let Some(error) = controller.error() {
        tracing::warn!(error_code = error.code(), "{error}");
    }
    tracing::info!(tx_hash = ?controller.tx_hash(), "Transfer completed");
    Ok(())
}

fn halt_on_error(controller: &TransferController) -> Result<(), TransactionError> {
    match controller.error() {
        Some(error) if error.is_fatal() => Err(error),
        _ => Ok(()),
    }
}

async fn log_progress(mut updates: tokio::sync::watch::Receiver<bridge_executors::AttemptState>) {
    let mut last = (Phase::None, 0.0);
    while updates.changed().await.is_ok() {
        let current = {
            let state = updates.borrow_and_update();
            (state.phase, state.confirmation_progress)
        };
        if current != last {
            tracing::info!(phase = %current.0, progress = current.1, "Attempt updated");
            last = current;
        }
    }
}
