use std::time::Duration;

pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Gas limit used when a form does not supply one. Sized for Azimuth calls.
pub const DEFAULT_GAS_LIMIT: u64 = 600_000;

pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

pub const DEFAULT_GAS_PRICE_GWEI: f64 = 20.0;

/// Pause that lets the progress bar animate between steps.
pub const PROGRESS_ANIMATION_DELAY: Duration = Duration::from_millis(500);

pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const CONFIRMATION_MAX_ATTEMPTS: u32 = 600;

pub const TANK_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const TANK_MAX_ATTEMPTS: u32 = 120;

pub const DEFAULT_HD_PATH: &str = "m/44'/60'/0'/0/0";
