use alloy::{
    consensus::{SignableTransaction, Signed, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    primitives::{Address, Bytes, Signature, SignatureError, TxHash, TxKind, U256},
};
use serde::{Deserialize, Serialize};

use crate::constants::WEI_PER_GWEI;

/// ### TransactionIntent
/// Unsigned description of what the user wants to send, produced by a form's
/// builder function. Nonce, chain id and gas are filled in at signing time.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub to: Option<Address>,

    #[serde(default)]
    pub data: Bytes,

    #[serde(default)]
    pub value: U256,
}

impl TransactionIntent {
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            value: U256::ZERO,
        }
    }

    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            data: Bytes::new(),
            value,
        }
    }

    /// A contract creation without init code can never do anything useful.
    pub fn is_malformed(&self) -> bool {
        self.to.is_none() && self.data.is_empty()
    }

    pub fn to_legacy_transaction(&self, context: &ChainContext) -> TxLegacy {
        TxLegacy {
            chain_id: Some(context.chain_id),
            nonce: context.nonce,
            gas_price: context.gas_price_wei(),
            gas_limit: context.gas_limit,
            to: self.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value: self.value,
            input: self.data.clone(),
        }
    }
}

/// Chain parameters resolved for one signing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainContext {
    pub nonce: u64,
    pub chain_id: u64,
    /// Whole gwei; fractional oracle values are rounded before they get here.
    pub gas_price_gwei: u64,
    pub gas_limit: u64,
}

impl ChainContext {
    pub fn gas_price_wei(&self) -> u128 {
        self.gas_price_gwei as u128 * WEI_PER_GWEI
    }
}

/// A signed legacy transaction together with its network encoding.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    inner: Signed<TxLegacy>,
    raw: Bytes,
}

impl SignedTransaction {
    pub fn new(signed: Signed<TxLegacy>) -> Self {
        let raw = TxEnvelope::from(signed.clone()).encoded_2718().into();
        Self { inner: signed, raw }
    }

    pub fn hash(&self) -> TxHash {
        *self.inner.hash()
    }

    pub fn nonce(&self) -> u64 {
        self.inner.tx().nonce
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.inner.tx().chain_id
    }

    pub fn gas_price(&self) -> u128 {
        self.inner.tx().gas_price
    }

    pub fn gas_limit(&self) -> u64 {
        self.inner.tx().gas_limit
    }

    pub fn transaction(&self) -> &TxLegacy {
        self.inner.tx()
    }

    pub fn signature(&self) -> &Signature {
        self.inner.signature()
    }

    pub fn recover_signer(&self) -> Result<Address, SignatureError> {
        self.signature()
            .recover_address_from_prehash(&self.inner.tx().signature_hash())
    }

    /// EIP-2718 encoded bytes, ready for `eth_sendRawTransaction`.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hexify(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for SignedTransaction {}

/// Present while the signing address cannot cover the transaction cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipRequest {
    pub beneficiary: Address,
    pub minimum_balance: U256,
    pub current_balance: U256,
}
