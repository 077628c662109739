pub mod tank;

pub use tank::{FundingService, TankClient, TankResponse};
