use std::{env, time::Duration};

use alloy::primitives::{Address, U256};
use anyhow::Context;
use bridge_core::{
    chain::NetworkType,
    constants::{
        CONFIRMATION_MAX_ATTEMPTS, CONFIRMATION_POLL_INTERVAL,
        DEFAULT_GAS_PRICE_GWEI, PROGRESS_ANIMATION_DELAY, TANK_MAX_ATTEMPTS, TANK_POLL_INTERVAL,
        TRANSFER_GAS_LIMIT,
    },
    credentials::WalletCredential,
    error::BridgeError,
};
use bridge_executors::{LifecycleConfig, NonceCollisionPolicy, PollBudget};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    pub network: NetworkSettings,
    pub tank: Option<TankConfig>,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    pub rpc_url: String,
    pub network_type: NetworkType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TankConfig {
    pub url: String,
    #[serde(default = "default_tank_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_tank_max_attempts")]
    pub max_attempts: u32,
}

fn default_tank_poll_interval_ms() -> u64 {
    TANK_POLL_INTERVAL.as_millis() as u64
}

fn default_tank_max_attempts() -> u32 {
    TANK_MAX_ATTEMPTS
}

impl TankConfig {
    pub fn budget(&self) -> PollBudget {
        PollBudget {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub initial_gas_limit: u64,
    pub initial_gas_price_gwei: f64,
    pub progress_animation_delay_ms: u64,
    pub confirmation_poll_interval_ms: u64,
    pub confirmation_max_attempts: u32,
    pub nonce_collision_policy: NonceCollisionPolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            initial_gas_limit: TRANSFER_GAS_LIMIT,
            initial_gas_price_gwei: DEFAULT_GAS_PRICE_GWEI,
            progress_animation_delay_ms: PROGRESS_ANIMATION_DELAY.as_millis() as u64,
            confirmation_poll_interval_ms: CONFIRMATION_POLL_INTERVAL.as_millis() as u64,
            confirmation_max_attempts: CONFIRMATION_MAX_ATTEMPTS,
            nonce_collision_policy: NonceCollisionPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let settings = &self.lifecycle;
        LifecycleConfig {
            initial_gas_limit: settings.initial_gas_limit,
            initial_gas_price_gwei: settings.initial_gas_price_gwei,
            progress_delay: Duration::from_millis(settings.progress_animation_delay_ms),
            confirmation: PollBudget {
                interval: Duration::from_millis(settings.confirmation_poll_interval_ms),
                max_attempts: settings.confirmation_max_attempts,
            },
            funding: self
                .tank
                .as_ref()
                .map(TankConfig::budget)
                .unwrap_or_else(PollBudget::funding),
            nonce_collision_policy: settings.nonce_collision_policy,
        }
    }
}

/// Exactly one of the fields is expected. A private key wins when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub private_key: Option<String>,
    pub watch_only: Option<Address>,
}

impl WalletConfig {
    pub fn credential(&self) -> Result<WalletCredential, BridgeError> {
        match (&self.private_key, self.watch_only) {
            (Some(key), _) => WalletCredential::from_private_key(key),
            (None, Some(address)) => Ok(WalletCredential::WatchOnly { address }),
            (None, None) => Err(BridgeError::ValidationError {
                message: "wallet needs either private_key or watch_only".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub to: Address,
    pub value_wei: U256,
    /// Azimuth point the transfer is made on behalf of. Enables tank sponsorship.
    #[serde(default)]
    pub point: Option<u32>,
}

pub fn get_config() -> anyhow::Result<BridgeConfig> {
    let base_path = env::current_dir().context("Failed to determine the current directory")?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("Failed to parse APP_ENVIRONMENT")?;

    let environment_filename = format!("bridge_{}.yaml", environment.as_str());

    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("bridge_base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)).required(false))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()
        .context("Failed to build configuration")?;

    config.try_deserialize::<BridgeConfig>().context(
        "Failed to deserialize configuration. Make sure all required fields are set correctly in your configuration files or environment variables.",
    )
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}
