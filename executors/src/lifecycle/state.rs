use alloy::primitives::TxHash;
use bridge_core::{
    gas::GasPriceOracle,
    transaction::{ChainContext, SignedTransaction, SponsorshipRequest, TransactionIntent},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::TransactionError;

/// Lifecycle phase of one transaction attempt. Ordered: phases only move
/// forward until the attempt is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    None,
    Signed,
    Broadcasted,
    Confirmed,
    Completed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::None => "NONE",
            Phase::Signed => "SIGNED",
            Phase::Broadcasted => "BROADCASTED",
            Phase::Confirmed => "CONFIRMED",
            Phase::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Asynchronous operation currently running for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    LoadingChainContext,
    Signing,
    Broadcasting,
    Completing,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type")]
pub enum InvalidTransition {
    #[error("{event} is not allowed in phase {phase}: {reason}")]
    NotAllowed {
        event: &'static str,
        phase: Phase,
        reason: &'static str,
    },

    #[error("{event} belongs to an attempt that has since been reset")]
    StaleAttempt { event: &'static str },

    #[error("{event} arrived after the controller was unmounted")]
    Unmounted { event: &'static str },
}

/// Inputs to the pure lifecycle state machine.
#[derive(Debug, Clone)]
pub enum Event {
    ChainContextRequested,
    ChainContextLoaded { nonce: u64, chain_id: u64 },
    ChainContextFailed(TransactionError),
    IntentConstructed(TransactionIntent),
    IntentBuilderFailed(TransactionError),
    IntentCleared,
    SigningStarted,
    Signed(SignedTransaction),
    SigningFailed(TransactionError),
    BroadcastStarted,
    NeedFunds(SponsorshipRequest),
    FundsArrived,
    Broadcasted(TxHash),
    ProgressAdvanced(f64),
    Confirmed,
    BroadcastFailed(TransactionError),
    RefetchFailed(TransactionError),
    Completed,
    GasPriceChanged(f64),
    GasPriceReset,
    PointSelected(Option<u32>),
    Reset,
    BuilderReplaced,
    Unmounted,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ChainContextRequested => "ChainContextRequested",
            Event::ChainContextLoaded { .. } => "ChainContextLoaded",
            Event::ChainContextFailed(_) => "ChainContextFailed",
            Event::IntentConstructed(_) => "IntentConstructed",
            Event::IntentBuilderFailed(_) => "IntentBuilderFailed",
            Event::IntentCleared => "IntentCleared",
            Event::SigningStarted => "SigningStarted",
            Event::Signed(_) => "Signed",
            Event::SigningFailed(_) => "SigningFailed",
            Event::BroadcastStarted => "BroadcastStarted",
            Event::NeedFunds(_) => "NeedFunds",
            Event::FundsArrived => "FundsArrived",
            Event::Broadcasted(_) => "Broadcasted",
            Event::ProgressAdvanced(_) => "ProgressAdvanced",
            Event::Confirmed => "Confirmed",
            Event::BroadcastFailed(_) => "BroadcastFailed",
            Event::RefetchFailed(_) => "RefetchFailed",
            Event::Completed => "Completed",
            Event::GasPriceChanged(_) => "GasPriceChanged",
            Event::GasPriceReset => "GasPriceReset",
            Event::PointSelected(_) => "PointSelected",
            Event::Reset => "Reset",
            Event::BuilderReplaced => "BuilderReplaced",
            Event::Unmounted => "Unmounted",
        }
    }
}

/// Snapshot of one transaction attempt.
#[derive(Debug, Clone)]
pub struct AttemptState {
    pub phase: Phase,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
    pub gas: GasPriceOracle,
    pub gas_limit: u64,
    pub intent: Option<TransactionIntent>,
    pub signed_transaction: Option<SignedTransaction>,
    pub tx_hash: Option<TxHash>,
    pub confirmation_progress: f64,
    pub error: Option<TransactionError>,
    pub need_funds: Option<SponsorshipRequest>,
    pub point: Option<u32>,
    pub operation: Option<Operation>,
    /// Bumped on every reset; completions from older generations are dropped.
    pub generation: u64,
    pub attempt_id: Uuid,
    pub mounted: bool,
}

impl AttemptState {
    pub fn new(gas: GasPriceOracle, gas_limit: u64) -> Self {
        Self {
            phase: Phase::None,
            nonce: None,
            chain_id: None,
            gas,
            gas_limit,
            intent: None,
            signed_transaction: None,
            tx_hash: None,
            confirmation_progress: 0.0,
            error: None,
            need_funds: None,
            point: None,
            operation: None,
            generation: 0,
            attempt_id: Uuid::new_v4(),
            mounted: true,
        }
    }

    pub fn is_default_state(&self) -> bool {
        self.phase == Phase::None
    }

    pub fn initializing(&self) -> bool {
        self.nonce.is_none() || self.chain_id.is_none()
    }

    pub fn constructed(&self) -> bool {
        self.intent.is_some()
    }

    pub fn can_sign(&self) -> bool {
        !self.initializing() && self.constructed() && self.is_default_state()
    }

    pub fn signed(&self) -> bool {
        self.phase == Phase::Signed
    }

    pub fn broadcasted(&self) -> bool {
        self.phase == Phase::Broadcasted
    }

    pub fn confirmed(&self) -> bool {
        self.phase == Phase::Confirmed
    }

    pub fn completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn inputs_locked(&self) -> bool {
        !self.is_default_state()
    }

    pub fn gas_price(&self) -> f64 {
        self.gas.gas_price()
    }

    /// Chain parameters for signing, once nonce and chain id are known.
    pub fn chain_context(&self) -> Option<ChainContext> {
        Some(ChainContext {
            nonce: self.nonce?,
            chain_id: self.chain_id?,
            gas_price_gwei: self.gas.rounded_gwei(),
            gas_limit: self.gas_limit,
        })
    }

    /// Applies `event` without mutating `self`.
    pub fn transition(&self, event: Event) -> Result<AttemptState, InvalidTransition> {
        let name = event.name();
        let reject = |reason: &'static str| InvalidTransition::NotAllowed {
            event: name,
            phase: self.phase,
            reason,
        };

        if !self.mounted {
            return Err(InvalidTransition::Unmounted { event: name });
        }

        let mut next = self.clone();

        match event {
            Event::ChainContextRequested => {
                if !self.initializing() {
                    return Err(reject("chain context is already loaded"));
                }
                if self.operation.is_some() {
                    return Err(reject("another operation is in flight"));
                }
                next.operation = Some(Operation::LoadingChainContext);
                next.error = None;
            }
            Event::ChainContextLoaded { nonce, chain_id } => {
                self.expect_operation(Operation::LoadingChainContext, name)?;
                next.nonce = Some(nonce);
                next.chain_id = Some(chain_id);
                next.operation = None;
            }
            Event::ChainContextFailed(error) => {
                self.expect_operation(Operation::LoadingChainContext, name)?;
                next.operation = None;
                next.error = Some(error);
            }
            Event::IntentConstructed(intent) => {
                self.expect_inputs_unlocked(name)?;
                next.intent = Some(intent);
                if matches!(
                    next.error,
                    Some(TransactionError::IntentBuilderError { .. })
                ) {
                    next.error = None;
                }
            }
            Event::IntentBuilderFailed(error) => {
                self.expect_inputs_unlocked(name)?;
                next.intent = None;
                next.error = Some(error);
            }
            Event::IntentCleared => {
                self.expect_inputs_unlocked(name)?;
                next.intent = None;
            }
            Event::SigningStarted => {
                if self.operation.is_some() {
                    return Err(reject("another operation is in flight"));
                }
                if !self.is_default_state() {
                    return Err(reject("transaction is already signed"));
                }
                if self.initializing() {
                    return Err(reject("nonce and chain id are not loaded yet"));
                }
                if !self.constructed() {
                    return Err(reject("no transaction has been constructed"));
                }
                next.operation = Some(Operation::Signing);
                next.error = None;
            }
            Event::Signed(transaction) => {
                self.expect_operation(Operation::Signing, name)?;
                next.signed_transaction = Some(transaction);
                next.phase = Phase::Signed;
                next.operation = None;
            }
            Event::SigningFailed(error) => {
                self.expect_operation(Operation::Signing, name)?;
                next.operation = None;
                next.error = Some(error);
            }
            Event::BroadcastStarted => {
                if self.operation.is_some() {
                    return Err(reject("another operation is in flight"));
                }
                if self.phase != Phase::Signed {
                    return Err(reject("only a signed transaction can be broadcast"));
                }
                next.operation = Some(Operation::Broadcasting);
                next.confirmation_progress = 0.0;
                next.error = None;
            }
            Event::NeedFunds(request) => {
                self.expect_operation(Operation::Broadcasting, name)?;
                next.need_funds = Some(request);
            }
            Event::FundsArrived => {
                self.expect_operation(Operation::Broadcasting, name)?;
                next.need_funds = None;
            }
            Event::Broadcasted(hash) => {
                self.expect_operation(Operation::Broadcasting, name)?;
                if self.phase != Phase::Signed {
                    return Err(reject("transaction was already broadcast"));
                }
                next.tx_hash = Some(hash);
                next.phase = Phase::Broadcasted;
            }
            Event::ProgressAdvanced(progress) => {
                if !matches!(
                    self.operation,
                    Some(Operation::Broadcasting | Operation::Completing)
                ) {
                    return Err(reject("progress only moves while broadcasting"));
                }
                if !(0.0..=1.0).contains(&progress) || progress < self.confirmation_progress {
                    return Err(reject("progress must increase within 0.0..=1.0"));
                }
                next.confirmation_progress = progress;
            }
            Event::Confirmed => {
                self.expect_operation(Operation::Broadcasting, name)?;
                if self.phase != Phase::Broadcasted {
                    return Err(reject("transaction has not been broadcast"));
                }
                next.phase = Phase::Confirmed;
                next.confirmation_progress = next.confirmation_progress.max(0.9);
                next.operation = Some(Operation::Completing);
            }
            Event::BroadcastFailed(error) => {
                self.expect_operation(Operation::Broadcasting, name)?;
                next.operation = None;
                next.need_funds = None;
                next.error = Some(error);
            }
            Event::RefetchFailed(error) => {
                self.expect_operation(Operation::Completing, name)?;
                next.error = Some(error);
            }
            Event::Completed => {
                self.expect_operation(Operation::Completing, name)?;
                next.phase = Phase::Completed;
                next.confirmation_progress = 1.0;
                next.operation = None;
            }
            Event::GasPriceChanged(gwei) => {
                self.expect_inputs_unlocked(name)?;
                if next.gas.set_gas_price(gwei).is_err() {
                    return Err(reject("gas price must be a non-negative number"));
                }
            }
            Event::GasPriceReset => {
                self.expect_inputs_unlocked(name)?;
                next.gas.reset_gas_price();
            }
            Event::PointSelected(point) => {
                next.point = point;
            }
            Event::Reset => {
                next.reset_attempt();
            }
            Event::BuilderReplaced => {
                next.reset_attempt();
                next.intent = None;
            }
            Event::Unmounted => {
                next.mounted = false;
                next.operation = None;
            }
        }

        Ok(next)
    }

    fn reset_attempt(&mut self) {
        self.phase = Phase::None;
        self.nonce = None;
        self.chain_id = None;
        self.gas.reset_gas_price();
        self.signed_transaction = None;
        self.tx_hash = None;
        self.confirmation_progress = 0.0;
        self.error = None;
        self.need_funds = None;
        self.operation = None;
        self.generation += 1;
        self.attempt_id = Uuid::new_v4();
    }

    fn expect_operation(
        &self,
        operation: Operation,
        event: &'static str,
    ) -> Result<(), InvalidTransition> {
        if self.operation == Some(operation) {
            Ok(())
        } else {
            Err(InvalidTransition::NotAllowed {
                event,
                phase: self.phase,
                reason: "no matching operation is in flight",
            })
        }
    }

    fn expect_inputs_unlocked(&self, event: &'static str) -> Result<(), InvalidTransition> {
        if self.inputs_locked() || self.operation == Some(Operation::Signing) {
            Err(InvalidTransition::NotAllowed {
                event,
                phase: self.phase,
                reason: "inputs are locked",
            })
        } else {
            Ok(())
        }
    }
}
