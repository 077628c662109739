use fixtures::*;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Bytes, TxHash, U256};
use bridge_core::signer::SigningError;
use bridge_core::transaction::ChainContext;
use bridge_executors::{
    InvalidTransition, Operation, Phase, TransactionError, refetch_fn,
};

#[tokio::test(start_paused = true)]
async fn test_signing_uses_chain_context() {
    setup_tracing();
    let network = Arc::new(MockNetwork::new(5, 1));
    let signer = Arc::new(MockSigner::new());
    let controller = controller(network.clone(), signer.clone());

    assert!(controller.initializing());
    controller.initialize().await.unwrap();
    assert!(!controller.initializing());
    assert_eq!(controller.nonce(), Some(5));
    assert_eq!(controller.chain_id(), Some(1));

    assert!(!controller.can_sign());
    controller.construct(U256::from(1_000u64)).await.unwrap();
    assert!(controller.constructed());
    assert!(controller.can_sign());

    controller.generate_and_sign().await.unwrap();

    assert!(controller.signed());
    assert!(controller.inputs_locked());
    assert_eq!(
        signer.contexts.lock().unwrap().as_slice(),
        &[ChainContext {
            nonce: 5,
            chain_id: 1,
            gas_price_gwei: 20,
            gas_limit: 21_000,
        }]
    );

    let signed = controller.signed_transaction().unwrap();
    assert_eq!(signed.nonce(), 5);
    assert_eq!(signed.chain_id(), Some(1));
    assert_eq!(signed.gas_price(), 20_000_000_000);
    assert_eq!(signed.gas_limit(), 21_000);
    assert_eq!(signed.recover_signer().unwrap(), SENDER);
}

#[tokio::test(start_paused = true)]
async fn test_fractional_gas_price_is_rounded_for_signing() {
    let network = Arc::new(MockNetwork::new(0, 1));
    let signer = Arc::new(MockSigner::new());
    let controller = controller(network, signer.clone());

    controller.initialize().await.unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();
    controller.set_gas_price(41.6).unwrap();
    assert_eq!(controller.gas_price(), 41.6);

    controller.generate_and_sign().await.unwrap();
    assert_eq!(signer.contexts.lock().unwrap()[0].gas_price_gwei, 42);
}

#[tokio::test(start_paused = true)]
async fn test_sign_without_chain_context_is_rejected() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let signer = Arc::new(MockSigner::new());
    let controller = controller(network, signer.clone());

    controller.construct(U256::from(1u64)).await.unwrap();
    let err = controller.generate_and_sign().await.unwrap_err();

    assert!(matches!(err, InvalidTransition::NotAllowed { .. }));
    assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    assert!(controller.is_default_state());
    assert_eq!(controller.error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_signer_rejection_stays_in_none() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let signer = Arc::new(MockSigner::rejecting());
    let controller = controller(network, signer.clone());

    controller.initialize().await.unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();
    controller.generate_and_sign().await.unwrap();

    assert_eq!(controller.snapshot().phase, Phase::None);
    assert_eq!(
        controller.error(),
        Some(TransactionError::SigningError {
            kind: SigningError::Rejected
        })
    );
    assert!(controller.signed_transaction().is_none());
    // no automatic retry
    assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
    // the intent survives, so the user can try again
    assert!(controller.constructed());
    assert!(controller.can_sign());
}

#[tokio::test(start_paused = true)]
async fn test_chain_fetch_failure_is_stored() {
    let network = Arc::new(MockNetwork::new(5, 1).with_failing_chain_id());
    let controller = controller(network, Arc::new(MockSigner::new()));

    controller.initialize().await.unwrap();

    assert!(controller.initializing());
    assert!(matches!(
        controller.error(),
        Some(TransactionError::ChainFetchError { .. })
    ));
    assert_eq!(controller.snapshot().operation, None);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sign_is_rejected() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let signer = Arc::new(MockSigner::new());
    let controller = controller(network, signer.clone());
    controller.initialize().await.unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();

    let gate = signer.gate();
    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.generate_and_sign().await }
    });
    while controller.snapshot().operation != Some(Operation::Signing) {
        tokio::task::yield_now().await;
    }

    let err = controller.generate_and_sign().await.unwrap_err();
    assert!(matches!(err, InvalidTransition::NotAllowed { .. }));

    gate.notify_one();
    first.await.unwrap().unwrap();
    assert!(controller.signed());
    assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_confirms_after_two_polls() {
    setup_tracing();
    let network = Arc::new(MockNetwork::new(5, 1).with_receipts([None]).confirming());
    let refetches = Arc::new(Mutex::new(0));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_refetch(refetch_fn({
            let refetches = refetches.clone();
            move || {
                let refetches = refetches.clone();
                async move {
                    *refetches.lock().unwrap() += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    Ok(())
                }
            }
        }));
    let signed = controller.signed_transaction().unwrap();

    let mut progress = controller.subscribe();
    let trace = Arc::new(Mutex::new(vec![progress.borrow_and_update().confirmation_progress]));
    let collector = tokio::spawn({
        let trace = trace.clone();
        async move {
            while progress.changed().await.is_ok() {
                let value = progress.borrow_and_update().confirmation_progress;
                let mut trace = trace.lock().unwrap();
                if trace.last() != Some(&value) {
                    trace.push(value);
                }
            }
        }
    });

    controller.broadcast().await.unwrap();
    collector.abort();

    assert_eq!(controller.error(), None);
    assert!(controller.completed());
    assert_eq!(controller.tx_hash(), Some(signed.hash()));
    assert_eq!(controller.confirmation_progress(), 1.0);
    assert_eq!(network.send_calls.load(Ordering::SeqCst), 1);
    assert_eq!(network.receipt_calls.load(Ordering::SeqCst), 2);
    assert_eq!(*refetches.lock().unwrap(), 1);
    assert_eq!(*trace.lock().unwrap(), vec![0.0, 0.2, 0.9, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_keeps_hash() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new())).await;
    let hash = controller.signed_transaction().unwrap().hash();

    controller.broadcast().await.unwrap();

    assert!(controller.broadcasted());
    assert_eq!(controller.tx_hash(), Some(hash));
    assert_eq!(controller.confirmation_progress(), 0.2);
    assert_eq!(
        controller.error(),
        Some(TransactionError::ConfirmationTimeoutError {
            tx_hash: hash,
            attempts: 3
        })
    );
    assert_eq!(network.receipt_calls.load(Ordering::SeqCst), 3);
    // no automatic rebroadcast
    assert_eq!(network.send_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reverted_transaction() {
    let mut receipt = success_receipt(TxHash::ZERO);
    receipt.success = false;
    let network = Arc::new(MockNetwork::new(5, 1).with_receipts([Some(receipt)]));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new())).await;

    controller.broadcast().await.unwrap();

    assert!(controller.broadcasted());
    assert!(matches!(
        controller.error(),
        Some(TransactionError::TransactionReverted {
            block_number: Some(100),
            ..
        })
    ));
    assert_eq!(network.receipt_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_error_halts_at_signed() {
    let network = Arc::new(MockNetwork::new(5, 1).with_send_error("insufficient funds for gas * price + value"));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new())).await;

    controller.broadcast().await.unwrap();

    assert!(controller.signed());
    assert_eq!(controller.tx_hash(), None);
    assert!(matches!(
        controller.error(),
        Some(TransactionError::BroadcastError { .. })
    ));
    assert_eq!(controller.snapshot().operation, None);
}

#[tokio::test(start_paused = true)]
async fn test_already_known_counts_as_sent() {
    let network = Arc::new(MockNetwork::new(5, 1).with_send_error("already known"));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new())).await;
    let hash = controller.signed_transaction().unwrap().hash();

    controller.broadcast().await.unwrap();

    // the mock never mines it, but the hash is the locally computed one
    assert!(controller.broadcasted());
    assert_eq!(controller.tx_hash(), Some(hash));
}

#[tokio::test(start_paused = true)]
async fn test_refetch_failure_still_completes() {
    let network = Arc::new(MockNetwork::new(5, 1).confirming());
    let controller = signed_controller(network, Arc::new(MockSigner::new()))
        .await
        .with_refetch(refetch_fn(|| async {
            Err(bridge_core::error::BridgeError::InternalError {
                message: "indexer unavailable".to_string(),
            })
        }));

    controller.broadcast().await.unwrap();

    assert!(controller.completed());
    assert_eq!(controller.confirmation_progress(), 1.0);
    let error = controller.error().unwrap();
    assert_eq!(
        error.to_string(),
        "The transaction succeeded but we were unable to refresh chain state. Refresh to continue."
    );
    assert!(!error.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_reset_after_completion_restores_defaults() {
    let network = Arc::new(MockNetwork::new(5, 1).confirming());
    let signer = Arc::new(MockSigner::new());
    let controller = controller(network, signer);

    controller.initialize().await.unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();
    controller.set_gas_price(35.0).unwrap();
    controller.generate_and_sign().await.unwrap();
    controller.broadcast().await.unwrap();
    assert!(controller.completed());
    let before = controller.snapshot();

    controller.reset().unwrap();

    let state = controller.snapshot();
    assert!(state.is_default_state());
    assert_eq!(state.phase, Phase::None);
    assert_eq!(state.nonce, None);
    assert_eq!(state.chain_id, None);
    assert_eq!(state.tx_hash, None);
    assert!(state.signed_transaction.is_none());
    assert_eq!(state.confirmation_progress, 0.0);
    assert_eq!(state.error, None);
    assert_eq!(state.need_funds, None);
    assert_eq!(state.gas_price(), 20.0);
    assert_eq!(state.generation, before.generation + 1);
    assert_ne!(state.attempt_id, before.attempt_id);
    // the form inputs did not change, so neither does the intent
    assert!(state.constructed());
    assert!(state.initializing());
}

#[tokio::test(start_paused = true)]
async fn test_stale_chain_context_is_dropped_after_reset() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = controller(network.clone(), Arc::new(MockSigner::new()));

    let gate = network.gate_nonce();
    let fetch = tokio::spawn({
        let controller = controller.clone();
        async move { controller.initialize().await }
    });
    while controller.snapshot().operation != Some(Operation::LoadingChainContext) {
        tokio::task::yield_now().await;
    }

    controller.reset().unwrap();
    gate.notify_one();
    fetch.await.unwrap().unwrap();

    assert_eq!(controller.nonce(), None);
    assert_eq!(controller.chain_id(), None);
    assert_eq!(controller.snapshot().operation, None);

    controller.initialize().await.unwrap();
    assert_eq!(controller.nonce(), Some(5));
    assert_eq!(network.nonce_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_drops_late_results() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = signed_controller(network, Arc::new(MockSigner::new())).await;

    let broadcast = tokio::spawn({
        let controller = controller.clone();
        async move { controller.broadcast().await }
    });
    while !controller.broadcasted() {
        tokio::task::yield_now().await;
    }

    controller.unmount();
    broadcast.await.unwrap().unwrap();

    let state = controller.snapshot();
    assert!(!state.mounted);
    assert_eq!(state.phase, Phase::Broadcasted);
    // everything after unmount was dropped
    assert_eq!(state.confirmation_progress, 0.0);
    assert_eq!(state.error, None);
    assert!(matches!(
        controller.reset(),
        Err(InvalidTransition::Unmounted { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_inputs_locked_after_signing() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = signed_controller(network, Arc::new(MockSigner::new())).await;

    assert!(controller.set_gas_price(50.0).is_err());
    assert!(controller.reset_gas_price().is_err());
    assert!(controller.unconstruct().is_err());
    assert!(controller.construct(U256::from(2u64)).await.is_err());
    assert_eq!(controller.gas_price(), 20.0);
    assert!(controller.constructed());
}

#[tokio::test(start_paused = true)]
async fn test_builder_failure_and_replacement() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = controller(network, Arc::new(MockSigner::new()));
    controller.initialize().await.unwrap();

    controller.construct(U256::from(1u64)).await.unwrap();
    assert!(controller.constructed());

    // unconstruct twice is fine
    controller.unconstruct().unwrap();
    controller.unconstruct().unwrap();
    assert!(!controller.constructed());

    controller.replace_builder(failing_builder()).unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();
    assert!(!controller.constructed());
    assert!(matches!(
        controller.error(),
        Some(TransactionError::IntentBuilderError { .. })
    ));

    controller.replace_builder(transfer_builder()).unwrap();
    assert_eq!(controller.error(), None);
    // replacing the builder starts a fresh attempt
    assert!(controller.initializing());
    controller.initialize().await.unwrap();
    controller.construct(U256::from(7u64)).await.unwrap();
    assert!(controller.can_sign());
    assert_eq!(
        controller.snapshot().intent.unwrap().value,
        U256::from(7u64)
    );
}

#[tokio::test(start_paused = true)]
async fn test_replace_builder_clears_intent_but_reset_keeps_it() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = controller(network, Arc::new(MockSigner::new()));
    controller.initialize().await.unwrap();
    controller.construct(U256::from(1u64)).await.unwrap();

    controller.reset().unwrap();
    assert!(controller.constructed());

    controller.replace_builder(transfer_builder()).unwrap();
    assert!(!controller.constructed());
}

fn sponsored_network() -> MockNetwork {
    MockNetwork::new(5, 1).with_balances([U256::ZERO, U256::from(10u64).pow(U256::from(18u64))])
}

#[tokio::test(start_paused = true)]
async fn test_sponsored_broadcast_waits_for_tank() {
    let network = Arc::new(sponsored_network().confirming());
    let tank = Arc::new(MockFundingService::new());
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(tank.clone());
    controller.set_point_cursor(Some(256)).unwrap();
    let raw: Bytes = controller.signed_transaction().unwrap().raw().clone();

    let mut updates = controller.subscribe();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let collector = tokio::spawn({
        let requests = requests.clone();
        async move {
            while updates.changed().await.is_ok() {
                if let Some(request) = updates.borrow_and_update().need_funds.clone() {
                    requests.lock().unwrap().push(request);
                }
            }
        }
    });

    controller.broadcast().await.unwrap();
    collector.abort();

    assert!(controller.completed(), "{:?}", controller.error());
    assert_eq!(controller.need_funds(), None);
    assert_eq!(*tank.requests.lock().unwrap(), vec![(256, vec![raw])]);
    assert_eq!(network.balance_calls.load(Ordering::SeqCst), 2);

    let requests = requests.lock().unwrap();
    assert!(!requests.is_empty());
    assert_eq!(requests[0].beneficiary, SENDER);
    assert_eq!(requests[0].current_balance, U256::ZERO);
    assert_eq!(
        requests[0].minimum_balance,
        U256::from(20_000_000_000u64 * 21_000)
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_point_skips_tank() {
    let network = Arc::new(MockNetwork::new(5, 1).with_balances([U256::ZERO]).confirming());
    let tank = Arc::new(MockFundingService::new());
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(tank.clone());

    controller.broadcast().await.unwrap();

    assert!(controller.completed());
    assert!(tank.requests.lock().unwrap().is_empty());
    assert_eq!(network.balance_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tank_rejection_halts_before_send() {
    let network = Arc::new(MockNetwork::new(5, 1).with_balances([U256::ZERO]));
    let tank = Arc::new(MockFundingService::rejecting("point has no sponsorship left"));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(tank);
    controller.set_point_cursor(Some(7)).unwrap();

    controller.broadcast().await.unwrap();

    assert!(controller.signed());
    assert_eq!(
        controller.error(),
        Some(TransactionError::FundingServiceError {
            point: 7,
            message: "point has no sponsorship left".to_string()
        })
    );
    assert_eq!(network.send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tank_timeout_clears_need_funds() {
    let network = Arc::new(MockNetwork::new(5, 1).with_balances([U256::ZERO]));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(Arc::new(MockFundingService::new()));
    controller.set_point_cursor(Some(7)).unwrap();

    controller.broadcast().await.unwrap();

    assert!(controller.signed());
    assert_eq!(controller.need_funds(), None);
    assert!(matches!(
        controller.error(),
        Some(TransactionError::FundingTimeoutError { address, .. }) if address == SENDER
    ));
    // initial read plus one per wait
    assert_eq!(network.balance_calls.load(Ordering::SeqCst), 4);
    assert_eq!(network.send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_sponsorship_wait_sends_nothing() {
    setup_tracing();
    let one_eth = U256::from(10u64).pow(U256::from(18u64));
    let network = Arc::new(
        MockNetwork::new(5, 1)
            .with_balances([U256::ZERO, U256::ZERO, one_eth])
            .confirming(),
    );
    let tank = Arc::new(MockFundingService::new());
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(tank.clone());
    controller.set_point_cursor(Some(7)).unwrap();

    let broadcast = tokio::spawn({
        let controller = controller.clone();
        async move { controller.broadcast().await }
    });
    controller
        .subscribe()
        .wait_for(|state| state.need_funds.is_some())
        .await
        .unwrap();

    controller.reset().unwrap();
    broadcast.await.unwrap().unwrap();

    // the abandoned transaction must not race the next attempt for its nonce
    assert_eq!(network.send_calls.load(Ordering::SeqCst), 0);
    assert_eq!(network.balance_calls.load(Ordering::SeqCst), 1);
    assert_eq!(tank.requests.lock().unwrap().len(), 1);

    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::None);
    assert_eq!(state.tx_hash, None);
    assert_eq!(state.need_funds, None);
    assert_eq!(state.error, None);
    assert_eq!(state.operation, None);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_stops_receipt_polling() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new())).await;

    let broadcast = tokio::spawn({
        let controller = controller.clone();
        async move { controller.broadcast().await }
    });
    controller
        .subscribe()
        .wait_for(|state| state.confirmation_progress >= 0.2)
        .await
        .unwrap();
    assert_eq!(network.receipt_calls.load(Ordering::SeqCst), 1);

    controller.unmount();
    broadcast.await.unwrap().unwrap();

    assert_eq!(network.receipt_calls.load(Ordering::SeqCst), 1);
    let state = controller.snapshot();
    assert_eq!(state.phase, Phase::Broadcasted);
    assert_eq!(state.error, None);
}

#[tokio::test(start_paused = true)]
async fn test_nonce_too_low_is_tolerated_only_when_sponsored() {
    let network = Arc::new(sponsored_network().with_send_error("nonce too low"));
    let controller = signed_controller(network.clone(), Arc::new(MockSigner::new()))
        .await
        .with_funding_service(Arc::new(MockFundingService::new()));
    let hash = controller.signed_transaction().unwrap().hash();
    controller.set_point_cursor(Some(1)).unwrap();

    controller.broadcast().await.unwrap();
    assert!(controller.broadcasted());
    assert_eq!(controller.tx_hash(), Some(hash));

    let network = Arc::new(MockNetwork::new(5, 1).with_send_error("nonce too low"));
    let controller = signed_controller(network, Arc::new(MockSigner::new())).await;

    controller.broadcast().await.unwrap();
    assert!(controller.signed());
    assert!(matches!(
        controller.error(),
        Some(TransactionError::BroadcastError { .. })
    ));
}

#[tokio::test]
async fn test_network_gas_suggestion_is_explicit() {
    let network = Arc::new(MockNetwork::new(5, 1));
    let controller = controller(network.clone(), Arc::new(MockSigner::new()));

    let suggested = bridge_core::gas::GasPriceOracle::suggest_from_network(network.as_ref())
        .await
        .unwrap();
    assert_eq!(suggested, 20.0);
    // the controller keeps its configured price until told otherwise
    assert_eq!(controller.gas_price(), 20.0);

    controller.set_gas_price(suggested + 1.5).unwrap();
    assert_eq!(controller.gas_price(), 21.5);
    controller.reset_gas_price().unwrap();
    assert_eq!(controller.gas_price(), 20.0);
}
