// In crates/risk/src/types.rs

use app_config::SandboxSettings;
use serde::Deserialize;

/// Raw margin parameters, as they appear in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarginSettings {
    pub intraday_leverage: f64,
    pub carryforward_leverage: f64,
    pub delivery_leverage: f64,
    /// Brokerage as a fraction of traded value (e.g., 0.0003 for 0.03%).
    pub fee_rate: f64,
}

impl From<&SandboxSettings> for MarginSettings {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            intraday_leverage: settings.intraday_leverage,
            carryforward_leverage: settings.carryforward_leverage,
            delivery_leverage: settings.delivery_leverage,
            fee_rate: settings.fee_rate,
        }
    }
}
