pub mod config;
pub mod fees;
pub mod gate;
pub mod manager;
pub mod models;
#[cfg(test)]
mod tests;

pub use config::RiskConfig;
pub use fees::{estimate_fees, estimate_trade_fees, AssetClass, FeeEstimate, TradeFeeQuote};
pub use gate::{OpenRequest, TradeGate, TradeOutcome};
pub use manager::RiskManager;
pub use models::*;
