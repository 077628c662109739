pub mod lifecycle;
pub mod metrics;

pub use lifecycle::{
    IntentBuilder, LifecycleConfig, PollBudget, Refetch, TransactionController, intent_builder,
    refetch_fn,
    error::TransactionError,
    send::NonceCollisionPolicy,
    state::{AttemptState, Event, InvalidTransition, Operation, Phase},
};
