use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{
    chain::EthereumNetwork,
    constants::WEI_PER_GWEI,
    error::{AlloyRpcErrorToBridgeError, BridgeError},
};

/// Current gas price in gwei plus the default it resets to.
///
/// The oracle does not care where a value comes from; a price feed, the user
/// or [`GasPriceOracle::suggest_from_network`] can all set it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceOracle {
    initial_gwei: f64,
    current_gwei: f64,
}

impl GasPriceOracle {
    pub fn new(initial_gwei: f64) -> Self {
        Self {
            initial_gwei,
            current_gwei: initial_gwei,
        }
    }

    pub fn gas_price(&self) -> f64 {
        self.current_gwei
    }

    pub fn initial_gas_price(&self) -> f64 {
        self.initial_gwei
    }

    pub fn set_gas_price(&mut self, gwei: f64) -> Result<(), BridgeError> {
        if !gwei.is_finite() || gwei < 0.0 {
            return Err(BridgeError::ValidationError {
                message: format!("Gas price must be a non-negative number of gwei, got {gwei}"),
            });
        }

        self.current_gwei = gwei;
        Ok(())
    }

    pub fn reset_gas_price(&mut self) {
        self.current_gwei = self.initial_gwei;
    }

    /// Gas price as signed into the transaction.
    pub fn rounded_gwei(&self) -> u64 {
        self.current_gwei.round() as u64
    }

    /// Upper bound on what the transaction can spend on gas, in wei.
    pub fn cost_wei(&self, gas_limit: u64) -> U256 {
        U256::from(gas_limit) * U256::from(self.rounded_gwei()) * U256::from(WEI_PER_GWEI)
    }

    /// Reads `eth_gasPrice` and returns it in gwei.
    pub async fn suggest_from_network(network: &impl EthereumNetwork) -> Result<f64, BridgeError> {
        let wei = network
            .get_gas_price()
            .await
            .map_err(|e| e.to_bridge_error(network))?;

        Ok(wei as f64 / WEI_PER_GWEI as f64)
    }
}

impl Default for GasPriceOracle {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_GAS_PRICE_GWEI)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_reset() {
        let mut oracle = GasPriceOracle::new(20.0);
        oracle.set_gas_price(35.5).unwrap();
        assert_eq!(oracle.gas_price(), 35.5);

        oracle.reset_gas_price();
        assert_eq!(oracle.gas_price(), 20.0);
        assert_eq!(oracle.initial_gas_price(), 20.0);
    }

    #[test]
    fn test_rejects_invalid_prices() {
        let mut oracle = GasPriceOracle::new(20.0);
        assert!(oracle.set_gas_price(-1.0).is_err());
        assert!(oracle.set_gas_price(f64::NAN).is_err());
        assert_eq!(oracle.gas_price(), 20.0);
    }

    #[test]
    fn test_rounding_and_cost() {
        let mut oracle = GasPriceOracle::new(20.4);
        assert_eq!(oracle.rounded_gwei(), 20);

        oracle.set_gas_price(20.5).unwrap();
        assert_eq!(oracle.rounded_gwei(), 21);

        let oracle = GasPriceOracle::new(20.0);
        // 21000 gas at 20 gwei
        assert_eq!(
            oracle.cost_wei(21_000),
            U256::from(420_000_000_000_000u64)
        );
    }
}
