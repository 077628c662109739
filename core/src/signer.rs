use std::future::Future;

use alloy::{
    consensus::{SignableTransaction, TxLegacy},
    network::TxSigner,
    primitives::{Address, Signature},
    signers::local::PrivateKeySigner,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    chain::NetworkType,
    credentials::{HardwareKind, SigningStrategy, WalletCredential},
    error::BridgeError,
    transaction::{ChainContext, SignedTransaction, TransactionIntent},
};

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum SigningError {
    #[error("{strategy} wallets cannot sign transactions")]
    Unsupported { strategy: String },

    #[error("Transaction was rejected on the device")]
    Rejected,

    #[error("Unexpected response from signing device: {message}")]
    UnsupportedResponse { message: String },

    #[error("Malformed transaction: {message}")]
    MalformedIntent { message: String },

    #[error("Signing failed: {message}")]
    SignerFailure { message: String },
}

/// Errors a connected hardware device can report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("rejected by user")]
    Rejected,
    #[error("device disconnected")]
    Disconnected,
    #[error("invalid device response: {0}")]
    InvalidResponse(String),
}

impl From<DeviceError> for SigningError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::Rejected => SigningError::Rejected,
            other => SigningError::UnsupportedResponse {
                message: other.to_string(),
            },
        }
    }
}

/// Normalised input every signing strategy consumes.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub intent: &'a TransactionIntent,
    pub context: ChainContext,
    pub network: NetworkType,
}

impl SigningRequest<'_> {
    fn prepare(&self) -> Result<TxLegacy, SigningError> {
        if self.intent.is_malformed() {
            return Err(SigningError::MalformedIntent {
                message: "transaction has neither a recipient nor init code".to_string(),
            });
        }

        Ok(self.intent.to_legacy_transaction(&self.context))
    }
}

/// Produces a [`SignedTransaction`] for one wallet strategy.
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;
    fn strategy(&self) -> SigningStrategy;

    /// Hardware strategies have no timeout: this waits on the device until it
    /// answers or the user rejects.
    fn sign_transaction(
        &self,
        request: SigningRequest<'_>,
    ) -> impl Future<Output = Result<SignedTransaction, SigningError>> + Send;
}

/// Handle to a connected signing device.
pub trait HardwareDevice: Send + Sync {
    fn sign_transaction(
        &self,
        derivation_path: &str,
        transaction: &TxLegacy,
    ) -> impl Future<Output = Result<Signature, DeviceError>> + Send;
}

/// Raw private key held in memory.
#[derive(Debug, Clone)]
pub struct SoftwareKeySigner {
    signer: PrivateKeySigner,
}

impl SoftwareKeySigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }
}

impl TransactionSigner for SoftwareKeySigner {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn strategy(&self) -> SigningStrategy {
        SigningStrategy::SoftwareKey
    }

    async fn sign_transaction(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<SignedTransaction, SigningError> {
        let mut tx = request.prepare()?;

        let signature = TxSigner::sign_transaction(&self.signer, &mut tx)
            .await
            .map_err(|e| {
                tracing::error!("Error signing transaction with software key: {:?}", e);
                SigningError::SignerFailure {
                    message: e.to_string(),
                }
            })?;

        Ok(SignedTransaction::new(tx.into_signed(signature)))
    }
}

/// Hierarchical-deterministic hardware wallet reached through a device handle.
pub struct HardwareWalletSigner<D> {
    kind: HardwareKind,
    address: Address,
    derivation_path: String,
    device: D,
}

impl<D: HardwareDevice> HardwareWalletSigner<D> {
    pub fn new(kind: HardwareKind, address: Address, derivation_path: String, device: D) -> Self {
        Self {
            kind,
            address,
            derivation_path,
            device,
        }
    }

    pub fn derivation_path(&self) -> &str {
        &self.derivation_path
    }
}

impl<D: HardwareDevice> TransactionSigner for HardwareWalletSigner<D> {
    fn address(&self) -> Address {
        self.address
    }

    fn strategy(&self) -> SigningStrategy {
        SigningStrategy::Hardware(self.kind)
    }

    async fn sign_transaction(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<SignedTransaction, SigningError> {
        let tx = request.prepare()?;

        tracing::info!(
            device = ?self.kind,
            path = %self.derivation_path,
            network = request.network.as_str(),
            nonce = tx.nonce,
            "Waiting for hardware wallet confirmation"
        );

        let signature = self
            .device
            .sign_transaction(&self.derivation_path, &tx)
            .await?;

        // A signature for some other key means the device answered for the wrong account
        let recovered = signature
            .recover_address_from_prehash(&tx.signature_hash())
            .map_err(|e| SigningError::UnsupportedResponse {
                message: format!("signature does not recover: {e}"),
            })?;
        if recovered != self.address {
            return Err(SigningError::UnsupportedResponse {
                message: format!(
                    "device signed for {recovered}, expected {address}",
                    address = self.address
                ),
            });
        }

        Ok(SignedTransaction::new(tx.into_signed(signature)))
    }
}

/// Can view an address but never sign for it.
#[derive(Debug, Clone)]
pub struct WatchOnlySigner {
    address: Address,
}

impl WatchOnlySigner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

impl TransactionSigner for WatchOnlySigner {
    fn address(&self) -> Address {
        self.address
    }

    fn strategy(&self) -> SigningStrategy {
        SigningStrategy::WatchOnly
    }

    async fn sign_transaction(
        &self,
        _request: SigningRequest<'_>,
    ) -> Result<SignedTransaction, SigningError> {
        Err(SigningError::Unsupported {
            strategy: SigningStrategy::WatchOnly.to_string(),
        })
    }
}

/// Uses any alloy [`TxSigner`] (e.g. a Ledger or Trezor signer) as a device.
///
/// Those signers are opened with their derivation path already selected, so
/// the path passed in here is only informational.
pub struct TxSignerDevice<S>(pub S);

impl<S> HardwareDevice for TxSignerDevice<S>
where
    S: TxSigner<Signature> + Send + Sync,
{
    async fn sign_transaction(
        &self,
        _derivation_path: &str,
        transaction: &TxLegacy,
    ) -> Result<Signature, DeviceError> {
        let mut tx = transaction.clone();
        self.0.sign_transaction(&mut tx).await.map_err(|e| {
            let message = e.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("reject") || lowered.contains("denied") {
                DeviceError::Rejected
            } else {
                DeviceError::InvalidResponse(message)
            }
        })
    }
}

/// Placeholder device type for wallets that never talk to hardware.
pub enum NoDevice {}

impl HardwareDevice for NoDevice {
    async fn sign_transaction(
        &self,
        _derivation_path: &str,
        _transaction: &TxLegacy,
    ) -> Result<Signature, DeviceError> {
        match *self {}
    }
}

/// The signing strategy picked for a credential, chosen once when the wallet
/// is loaded.
pub enum WalletSigner<D = NoDevice> {
    Software(SoftwareKeySigner),
    Hardware(HardwareWalletSigner<D>),
    WatchOnly(WatchOnlySigner),
}

impl<D: HardwareDevice> WalletSigner<D> {
    pub fn from_credential(
        credential: WalletCredential,
        device: Option<D>,
    ) -> Result<Self, BridgeError> {
        match credential {
            WalletCredential::RawKey(signer) => {
                Ok(WalletSigner::Software(SoftwareKeySigner::new(signer)))
            }
            WalletCredential::Hardware {
                kind,
                address,
                derivation_path,
            } => {
                let device = device.ok_or_else(|| BridgeError::ValidationError {
                    message: format!("No {kind:?} device connected for {address}"),
                })?;
                Ok(WalletSigner::Hardware(HardwareWalletSigner::new(
                    kind,
                    address,
                    derivation_path,
                    device,
                )))
            }
            WalletCredential::WatchOnly { address } => {
                Ok(WalletSigner::WatchOnly(WatchOnlySigner::new(address)))
            }
        }
    }
}

impl<D: HardwareDevice> TransactionSigner for WalletSigner<D> {
    fn address(&self) -> Address {
        match self {
            WalletSigner::Software(signer) => signer.address(),
            WalletSigner::Hardware(signer) => signer.address(),
            WalletSigner::WatchOnly(signer) => signer.address(),
        }
    }

    fn strategy(&self) -> SigningStrategy {
        match self {
            WalletSigner::Software(signer) => signer.strategy(),
            WalletSigner::Hardware(signer) => signer.strategy(),
            WalletSigner::WatchOnly(signer) => signer.strategy(),
        }
    }

    async fn sign_transaction(
        &self,
        request: SigningRequest<'_>,
    ) -> Result<SignedTransaction, SigningError> {
        match self {
            WalletSigner::Software(signer) => signer.sign_transaction(request).await,
            WalletSigner::Hardware(signer) => signer.sign_transaction(request).await,
            WalletSigner::WatchOnly(signer) => signer.sign_transaction(request).await,
        }
    }
}
