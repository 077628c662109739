pub mod confirm;
pub mod error;
pub mod send;
pub mod state;
pub mod tank;

use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use alloy::primitives::{TxHash, U256};
use bridge_core::{
    chain::EthereumNetwork,
    constants::{
        CONFIRMATION_MAX_ATTEMPTS, CONFIRMATION_POLL_INTERVAL, DEFAULT_GAS_LIMIT,
        DEFAULT_GAS_PRICE_GWEI, PROGRESS_ANIMATION_DELAY, TANK_MAX_ATTEMPTS, TANK_POLL_INTERVAL,
    },
    error::{AlloyRpcErrorToBridgeError, BridgeError},
    gas::GasPriceOracle,
    rpc_clients::{FundingService, TankClient},
    signer::{SigningRequest, TransactionSigner},
    transaction::{SignedTransaction, SponsorshipRequest, TransactionIntent},
};
use futures::{FutureExt, future::BoxFuture};
use tokio::sync::watch;

use crate::metrics::{
    calculate_duration_seconds, current_timestamp_ms, record_broadcast_to_confirmed,
    record_failed_attempt, record_signing_duration, record_sponsorship_wait,
};

use self::{
    confirm::ConfirmationTracker,
    error::TransactionError,
    send::{Broadcaster, NonceCollisionPolicy},
    state::{AttemptState, Event, InvalidTransition},
    tank::FundingGateway,
};

/// Turns form arguments into a transaction intent.
pub type IntentBuilder<A> =
    Arc<dyn Fn(A) -> BoxFuture<'static, Result<TransactionIntent, BridgeError>> + Send + Sync>;

/// Reloads whatever chain state the caller shows once a transaction lands.
pub type Refetch = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BridgeError>> + Send + Sync>;

pub fn intent_builder<A, Fut>(builder: impl Fn(A) -> Fut + Send + Sync + 'static) -> IntentBuilder<A>
where
    Fut: Future<Output = Result<TransactionIntent, BridgeError>> + Send + 'static,
{
    Arc::new(
        move |args: A| -> BoxFuture<'static, Result<TransactionIntent, BridgeError>> {
            builder(args).boxed()
        },
    )
}

pub fn refetch_fn<Fut>(refetch: impl Fn() -> Fut + Send + Sync + 'static) -> Refetch
where
    Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<(), BridgeError>> { refetch().boxed() })
}

/// Fixed-interval polling with an upper bound on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub fn confirmation() -> Self {
        Self {
            interval: CONFIRMATION_POLL_INTERVAL,
            max_attempts: CONFIRMATION_MAX_ATTEMPTS,
        }
    }

    pub fn funding() -> Self {
        Self {
            interval: TANK_POLL_INTERVAL,
            max_attempts: TANK_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub initial_gas_limit: u64,
    pub initial_gas_price_gwei: f64,
    pub progress_delay: Duration,
    pub confirmation: PollBudget,
    pub funding: PollBudget,
    pub nonce_collision_policy: NonceCollisionPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initial_gas_limit: DEFAULT_GAS_LIMIT,
            initial_gas_price_gwei: DEFAULT_GAS_PRICE_GWEI,
            progress_delay: PROGRESS_ANIMATION_DELAY,
            confirmation: PollBudget::confirmation(),
            funding: PollBudget::funding(),
            nonce_collision_policy: NonceCollisionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttemptToken {
    generation: u64,
}

/// Drives one transaction attempt at a time through
/// NONE -> SIGNED -> BROADCASTED -> CONFIRMED -> COMPLETED.
///
/// State lives in a [`watch`] channel: every accepted event produces a new
/// snapshot that subscribers observe. Async operations capture an attempt
/// token when they start and their results are dropped if the attempt was
/// reset or the controller unmounted in the meantime.
pub struct TransactionController<A, N, S, F = TankClient> {
    network: Arc<N>,
    signer: Arc<S>,
    funding: Option<FundingGateway<N, F>>,
    funding_budget: PollBudget,
    broadcaster: Broadcaster<N>,
    tracker: ConfirmationTracker<N>,
    progress_delay: Duration,
    builder: Arc<RwLock<IntentBuilder<A>>>,
    refetch: Option<Refetch>,
    state: Arc<watch::Sender<AttemptState>>,
}

impl<A, N, S, F> Clone for TransactionController<A, N, S, F> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            signer: self.signer.clone(),
            funding: self.funding.clone(),
            funding_budget: self.funding_budget,
            broadcaster: self.broadcaster.clone(),
            tracker: self.tracker.clone(),
            progress_delay: self.progress_delay,
            builder: self.builder.clone(),
            refetch: self.refetch.clone(),
            state: self.state.clone(),
        }
    }
}

impl<A, N, S> TransactionController<A, N, S>
where
    A: Send + 'static,
    N: EthereumNetwork + 'static,
    S: TransactionSigner + 'static,
{
    pub fn new(
        network: Arc<N>,
        signer: Arc<S>,
        builder: IntentBuilder<A>,
        config: LifecycleConfig,
    ) -> Self {
        let (state, _) = watch::channel(AttemptState::new(
            GasPriceOracle::new(config.initial_gas_price_gwei),
            config.initial_gas_limit,
        ));

        Self {
            broadcaster: Broadcaster::new(network.clone(), config.nonce_collision_policy),
            tracker: ConfirmationTracker::new(network.clone(), config.confirmation),
            network,
            signer,
            funding: None,
            funding_budget: config.funding,
            progress_delay: config.progress_delay,
            builder: Arc::new(RwLock::new(builder)),
            refetch: None,
            state: Arc::new(state),
        }
    }
}

impl<A, N, S, F> TransactionController<A, N, S, F>
where
    A: Send + 'static,
    N: EthereumNetwork + 'static,
    S: TransactionSigner + 'static,
    F: FundingService + 'static,
{
    /// Enables gas tank sponsorship for attempts executed on behalf of a point.
    pub fn with_funding_service<G: FundingService + 'static>(
        self,
        service: Arc<G>,
    ) -> TransactionController<A, N, S, G> {
        TransactionController {
            funding: Some(FundingGateway::new(
                self.network.clone(),
                service,
                self.funding_budget,
            )),
            network: self.network,
            signer: self.signer,
            funding_budget: self.funding_budget,
            broadcaster: self.broadcaster,
            tracker: self.tracker,
            progress_delay: self.progress_delay,
            builder: self.builder,
            refetch: self.refetch,
            state: self.state,
        }
    }

    pub fn with_refetch(mut self, refetch: Refetch) -> Self {
        self.refetch = Some(refetch);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AttemptState {
        self.state.borrow().clone()
    }

    fn apply(
        &self,
        token: Option<AttemptToken>,
        event: Event,
    ) -> Result<AttemptState, InvalidTransition> {
        let name = event.name();
        let mut outcome = Err(InvalidTransition::StaleAttempt { event: name });

        self.state.send_if_modified(|state| {
            if let Some(token) = token {
                if state.mounted && state.generation != token.generation {
                    return false;
                }
            }

            match state.transition(event) {
                Ok(next) => {
                    *state = next;
                    outcome = Ok(state.clone());
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });

        outcome
    }

    /// Starts an operation and hands back the token its completion must carry.
    fn begin(&self, event: Event) -> Result<(AttemptToken, AttemptState), InvalidTransition> {
        let state = self.apply(None, event)?;
        Ok((
            AttemptToken {
                generation: state.generation,
            },
            state,
        ))
    }

    /// Applies the result of an operation. `Ok(false)` means the attempt was
    /// superseded and the result was dropped.
    fn commit(&self, token: AttemptToken, event: Event) -> Result<bool, InvalidTransition> {
        match self.apply(Some(token), event) {
            Ok(_) => Ok(true),
            Err(InvalidTransition::StaleAttempt { event })
            | Err(InvalidTransition::Unmounted { event }) => {
                tracing::debug!(
                    event,
                    generation = token.generation,
                    "Dropping late result for a superseded attempt"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn is_current(&self, token: AttemptToken) -> bool {
        let state = self.state.borrow();
        state.mounted && state.generation == token.generation
    }

    /// Resolves once the attempt behind `token` is reset or the controller
    /// unmounts.
    async fn superseded(&self, token: AttemptToken) {
        let mut updates = self.state.subscribe();
        if let Err(e) = updates
            .wait_for(|state| !state.mounted || state.generation != token.generation)
            .await
        {
            tracing::debug!(error = %e, "Attempt state channel closed");
        }
    }

    fn fail(
        &self,
        token: AttemptToken,
        error: TransactionError,
        into_event: fn(TransactionError) -> Event,
    ) -> Result<(), InvalidTransition> {
        tracing::error!(error_code = error.code(), error = %error, "Transaction attempt failed");
        record_failed_attempt(error.code());
        self.commit(token, into_event(error)).map(|_| ())
    }

    /// Loads nonce and chain id when either is unknown.
    #[tracing::instrument(skip_all, fields(from = %self.signer.address()))]
    pub async fn initialize(&self) -> Result<(), InvalidTransition> {
        if !self.snapshot().initializing() {
            return Ok(());
        }

        let (token, _) = self.begin(Event::ChainContextRequested)?;
        let address = self.signer.address();

        let loaded = tokio::try_join!(
            self.network.get_transaction_count(address),
            self.network.get_chain_id()
        );

        match loaded {
            Ok((nonce, chain_id)) => {
                tracing::debug!(nonce, chain_id, "Loaded chain context");
                self.commit(token, Event::ChainContextLoaded { nonce, chain_id })
                    .map(|_| ())
            }
            Err(e) => {
                let bridge_error = e.to_bridge_error(self.network.as_ref());
                self.fail(
                    token,
                    TransactionError::ChainFetchError {
                        message: bridge_error.to_string(),
                        inner_error: bridge_error,
                    },
                    Event::ChainContextFailed,
                )
            }
        }
    }

    /// Runs the builder and stores the resulting intent. A builder failure
    /// lands in the error slot.
    #[tracing::instrument(skip_all)]
    pub async fn construct(&self, args: A) -> Result<(), InvalidTransition> {
        let state = self.snapshot();
        if !state.mounted {
            return Err(InvalidTransition::Unmounted {
                event: "IntentConstructed",
            });
        }
        if state.inputs_locked() {
            return Err(InvalidTransition::NotAllowed {
                event: "IntentConstructed",
                phase: state.phase,
                reason: "inputs are locked",
            });
        }

        let token = AttemptToken {
            generation: state.generation,
        };
        let builder = self
            .builder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match builder(args).await {
            Ok(intent) => self
                .commit(token, Event::IntentConstructed(intent))
                .map(|_| ()),
            Err(e) => self.fail(
                token,
                TransactionError::IntentBuilderError {
                    message: e.to_string(),
                },
                Event::IntentBuilderFailed,
            ),
        }
    }

    pub fn unconstruct(&self) -> Result<(), InvalidTransition> {
        self.apply(None, Event::IntentCleared).map(|_| ())
    }

    #[tracing::instrument(skip_all, fields(from = %self.signer.address(), strategy = %self.signer.strategy()))]
    pub async fn generate_and_sign(&self) -> Result<(), InvalidTransition> {
        let (token, state) = self.begin(Event::SigningStarted)?;

        let (Some(intent), Some(context)) = (state.intent.as_ref(), state.chain_context()) else {
            return self.fail(
                token,
                TransactionError::InternalError {
                    message: "signing started without an intent or chain context".to_string(),
                },
                Event::SigningFailed,
            );
        };

        let network = self.network.network_type();
        tracing::info!(
            attempt_id = %state.attempt_id,
            nonce = context.nonce,
            chain_id = context.chain_id,
            gas_price_gwei = context.gas_price_gwei,
            gas_limit = context.gas_limit,
            "Signing transaction"
        );

        let started = current_timestamp_ms();
        let result = self
            .signer
            .sign_transaction(SigningRequest {
                intent,
                context,
                network,
            })
            .await;
        record_signing_duration(
            &self.signer.strategy().to_string(),
            network.as_str(),
            calculate_duration_seconds(started, current_timestamp_ms()),
        );

        match result {
            Ok(signed) => {
                tracing::info!(tx_hash = %signed.hash(), "Transaction signed");
                self.commit(token, Event::Signed(signed)).map(|_| ())
            }
            Err(e) => self.fail(token, e.into(), Event::SigningFailed),
        }
    }

    /// Sends the signed transaction (through the gas tank when a point is
    /// selected) and waits for it to confirm, then runs the completion step.
    #[tracing::instrument(skip_all, fields(from = %self.signer.address()))]
    pub async fn broadcast(&self) -> Result<(), InvalidTransition> {
        let (token, state) = self.begin(Event::BroadcastStarted)?;

        let Some(signed) = state.signed_transaction.clone() else {
            return self.fail(
                token,
                TransactionError::InternalError {
                    message: "broadcast started without a signed transaction".to_string(),
                },
                Event::BroadcastFailed,
            );
        };
        let network = self.network.network_type();
        let cost = state.gas.cost_wei(state.gas_limit);

        tracing::info!(
            attempt_id = %state.attempt_id,
            tx_hash = %signed.hash(),
            %cost,
            point = ?state.point,
            "Broadcasting transaction"
        );

        let sponsored = match (state.point, &self.funding) {
            (Some(point), Some(gateway)) => {
                let started = current_timestamp_ms();
                let result = tokio::select! {
                    result = self.fund(gateway, token, point, cost, &signed) => result,
                    _ = self.superseded(token) => {
                        tracing::debug!(point, "Attempt superseded while waiting for sponsorship");
                        return Ok(());
                    }
                };
                record_sponsorship_wait(
                    network.as_str(),
                    calculate_duration_seconds(started, current_timestamp_ms()),
                );

                match result {
                    Ok(sponsored) => sponsored,
                    Err(e) => return self.fail(token, e, Event::BroadcastFailed),
                }
            }
            _ => false,
        };

        // funds may arrive in the same instant the attempt is abandoned
        if !self.is_current(token) {
            tracing::debug!(
                generation = token.generation,
                "Attempt superseded before submission, not sending"
            );
            return Ok(());
        }

        let hash = match self.broadcaster.submit(&signed, sponsored).await {
            Ok(hash) => hash,
            Err(e) => return self.fail(token, e, Event::BroadcastFailed),
        };
        if !self.commit(token, Event::Broadcasted(hash))? {
            return Ok(());
        }

        tokio::time::sleep(self.progress_delay).await;

        if !self.commit(token, Event::ProgressAdvanced(0.2))? {
            return Ok(());
        }

        let broadcast_at = current_timestamp_ms();
        let confirmation = tokio::select! {
            result = self.tracker.wait_for_confirmation(hash) => result,
            _ = self.superseded(token) => {
                tracing::debug!(tx_hash = %hash, "Attempt superseded, no longer polling for a receipt");
                return Ok(());
            }
        };
        if let Err(e) = confirmation {
            return self.fail(token, e, Event::BroadcastFailed);
        }
        record_broadcast_to_confirmed(
            network.as_str(),
            calculate_duration_seconds(broadcast_at, current_timestamp_ms()),
        );

        if !self.commit(token, Event::Confirmed)? {
            return Ok(());
        }

        self.complete(token).await
    }

    async fn fund(
        &self,
        gateway: &FundingGateway<N, F>,
        token: AttemptToken,
        point: u32,
        cost: U256,
        signed: &SignedTransaction,
    ) -> Result<bool, TransactionError> {
        gateway
            .ensure_funds_for(
                point,
                self.signer.address(),
                cost,
                std::slice::from_ref(signed.raw()),
                |request: SponsorshipRequest| {
                    if let Err(e) = self.commit(token, Event::NeedFunds(request)) {
                        tracing::debug!(error = %e, "Funding request not recorded");
                    }
                },
                || {
                    if let Err(e) = self.commit(token, Event::FundsArrived) {
                        tracing::debug!(error = %e, "Funding arrival not recorded");
                    }
                },
            )
            .await
    }

    async fn complete(&self, token: AttemptToken) -> Result<(), InvalidTransition> {
        if let Some(refetch) = &self.refetch {
            if let Err(e) = refetch().await {
                // the user only sees the friendly message, keep the original in the logs
                tracing::error!(error = %e, "Failed to refresh chain state after confirmation");
                let error = TransactionError::RefetchError {
                    message: e.to_string(),
                };
                record_failed_attempt(error.code());
                if !self.commit(token, Event::RefetchFailed(error))? {
                    return Ok(());
                }
            }
        }

        if !self.commit(token, Event::ProgressAdvanced(1.0))? {
            return Ok(());
        }

        tokio::time::sleep(self.progress_delay).await;

        if self.commit(token, Event::Completed)? {
            tracing::info!("Transaction attempt completed");
        }
        Ok(())
    }

    /// Returns the attempt to NONE so it can be signed again. The constructed
    /// intent survives; nonce and chain id have to be loaded again.
    pub fn reset(&self) -> Result<(), InvalidTransition> {
        let state = self.apply(None, Event::Reset)?;
        tracing::debug!(
            generation = state.generation,
            attempt_id = %state.attempt_id,
            "Attempt reset"
        );
        Ok(())
    }

    /// Swaps the builder, which also resets the attempt and drops the intent.
    pub fn replace_builder(&self, builder: IntentBuilder<A>) -> Result<(), InvalidTransition> {
        *self
            .builder
            .write()
            .unwrap_or_else(PoisonError::into_inner) = builder;
        self.apply(None, Event::BuilderReplaced).map(|_| ())
    }

    pub fn set_gas_price(&self, gwei: f64) -> Result<(), InvalidTransition> {
        self.apply(None, Event::GasPriceChanged(gwei)).map(|_| ())
    }

    pub fn reset_gas_price(&self) -> Result<(), InvalidTransition> {
        self.apply(None, Event::GasPriceReset).map(|_| ())
    }

    pub fn set_point_cursor(&self, point: Option<u32>) -> Result<(), InvalidTransition> {
        self.apply(None, Event::PointSelected(point)).map(|_| ())
    }

    /// Invalidates every outstanding operation. Nothing is applied afterwards.
    pub fn unmount(&self) {
        if let Err(e) = self.apply(None, Event::Unmounted) {
            tracing::debug!(error = %e, "Controller already unmounted");
        }
    }

    pub fn is_default_state(&self) -> bool {
        self.state.borrow().is_default_state()
    }

    pub fn initializing(&self) -> bool {
        self.state.borrow().initializing()
    }

    pub fn constructed(&self) -> bool {
        self.state.borrow().constructed()
    }

    pub fn can_sign(&self) -> bool {
        self.state.borrow().can_sign()
    }

    pub fn signed(&self) -> bool {
        self.state.borrow().signed()
    }

    pub fn broadcasted(&self) -> bool {
        self.state.borrow().broadcasted()
    }

    pub fn confirmed(&self) -> bool {
        self.state.borrow().confirmed()
    }

    pub fn completed(&self) -> bool {
        self.state.borrow().completed()
    }

    pub fn inputs_locked(&self) -> bool {
        self.state.borrow().inputs_locked()
    }

    pub fn error(&self) -> Option<TransactionError> {
        self.state.borrow().error.clone()
    }

    pub fn confirmation_progress(&self) -> f64 {
        self.state.borrow().confirmation_progress
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.state.borrow().tx_hash
    }

    pub fn signed_transaction(&self) -> Option<SignedTransaction> {
        self.state.borrow().signed_transaction.clone()
    }

    pub fn gas_price(&self) -> f64 {
        self.state.borrow().gas_price()
    }

    pub fn nonce(&self) -> Option<u64> {
        self.state.borrow().nonce
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.state.borrow().chain_id
    }

    pub fn need_funds(&self) -> Option<SponsorshipRequest> {
        self.state.borrow().need_funds.clone()
    }
}
