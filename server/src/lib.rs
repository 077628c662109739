pub mod config;
pub mod runner;

pub use config::{
    BridgeConfig, LifecycleSettings, LogFormat, NetworkSettings, TankConfig, TransferConfig,
    WalletConfig,
};
pub use runner::{TransferArgs, TransferController, build_controller, run_transfer};
