use std::str::FromStr;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use serde::{Deserialize, Serialize};

use crate::{constants::DEFAULT_HD_PATH, error::BridgeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareKind {
    Ledger,
    Trezor,
}

/// How a credential produces signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "device", rename_all = "camelCase")]
pub enum SigningStrategy {
    SoftwareKey,
    Hardware(HardwareKind),
    WatchOnly,
}

impl std::fmt::Display for SigningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningStrategy::SoftwareKey => write!(f, "software key"),
            SigningStrategy::Hardware(HardwareKind::Ledger) => write!(f, "Ledger"),
            SigningStrategy::Hardware(HardwareKind::Trezor) => write!(f, "Trezor"),
            SigningStrategy::WatchOnly => write!(f, "watch-only"),
        }
    }
}

/// A wallet as held by the wallet store.
#[derive(Debug, Clone)]
pub enum WalletCredential {
    RawKey(PrivateKeySigner),
    Hardware {
        kind: HardwareKind,
        address: Address,
        derivation_path: String,
    },
    WatchOnly {
        address: Address,
    },
}

impl WalletCredential {
    pub fn from_private_key(private_key: &str) -> Result<Self, BridgeError> {
        let signer = PrivateKeySigner::from_str(private_key.trim_start_matches("0x"))?;
        Ok(WalletCredential::RawKey(signer))
    }

    pub fn hardware(kind: HardwareKind, address: Address, derivation_path: Option<String>) -> Self {
        WalletCredential::Hardware {
            kind,
            address,
            derivation_path: derivation_path.unwrap_or_else(|| DEFAULT_HD_PATH.to_string()),
        }
    }

    pub fn address(&self) -> Address {
        match self {
            WalletCredential::RawKey(signer) => signer.address(),
            WalletCredential::Hardware { address, .. } => *address,
            WalletCredential::WatchOnly { address } => *address,
        }
    }

    pub fn strategy(&self) -> SigningStrategy {
        match self {
            WalletCredential::RawKey(_) => SigningStrategy::SoftwareKey,
            WalletCredential::Hardware { kind, .. } => SigningStrategy::Hardware(*kind),
            WalletCredential::WatchOnly { .. } => SigningStrategy::WatchOnly,
        }
    }

    /// Only hierarchical-deterministic (hardware) wallets carry a path.
    pub fn derivation_path(&self) -> Option<&str> {
        match self {
            WalletCredential::Hardware {
                derivation_path, ..
            } => Some(derivation_path),
            _ => None,
        }
    }
}
