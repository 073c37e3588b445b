use analysis_core::Direction;
use anyhow::{anyhow, Result};
use broker_trait::MarketDataSource;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Spread assumed when no live quote is available (percent)
const FALLBACK_SPREAD_PCT: Decimal = dec!(0.1);

/// Fee category used to pick overnight rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stocks,
    Etf,
    Indices,
    Forex,
    Commodities,
    Crypto,
}

impl AssetClass {
    /// Map a broker asset-class id; unknown ids are treated as stocks
    pub fn from_broker_id(id: i64) -> Self {
        match id {
            5 => AssetClass::Stocks,
            10 => AssetClass::Etf,
            6 => AssetClass::Indices,
            3 => AssetClass::Forex,
            2 => AssetClass::Commodities,
            4 | 73 => AssetClass::Crypto,
            _ => AssetClass::Stocks,
        }
    }

    /// Annual overnight financing rate (percent) when held as a CFD
    pub fn overnight_annual_rate(&self) -> Decimal {
        match self {
            AssetClass::Stocks | AssetClass::Etf => dec!(6.4),
            AssetClass::Crypto => dec!(5.0),
            AssetClass::Forex => dec!(3.0),
            AssetClass::Commodities | AssetClass::Indices => dec!(5.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub spread_cost: Decimal,
    pub crypto_fee: Decimal,
    pub overnight_daily: Decimal,
    pub overnight_weekly: Decimal,
    pub overnight_monthly: Decimal,
    pub total_entry_cost: Decimal,
    pub total_1month_cost: Decimal,
    /// One-month cost as a percentage of the amount
    pub cost_pct: Decimal,
}

/// Estimate entry and holding costs for a position.
///
/// Overnight financing applies only to CFDs (leveraged or short). Money
/// fields are rounded to cents from unrounded intermediates.
pub fn estimate_fees(
    amount: Decimal,
    spread_pct: Decimal,
    asset_class: AssetClass,
    leverage: Decimal,
    is_short: bool,
) -> FeeEstimate {
    if amount <= Decimal::ZERO {
        return FeeEstimate::default();
    }

    let spread_cost = amount * spread_pct / dec!(100);

    let crypto_fee = if asset_class == AssetClass::Crypto && leverage <= Decimal::ONE && !is_short {
        amount * dec!(0.01)
    } else {
        Decimal::ZERO
    };

    let is_cfd = leverage > Decimal::ONE || is_short;
    let overnight_daily = if is_cfd {
        amount * leverage * asset_class.overnight_annual_rate() / dec!(100) / dec!(365)
    } else {
        Decimal::ZERO
    };
    let overnight_weekly = overnight_daily * dec!(7);
    let overnight_monthly = overnight_daily * dec!(30);

    let total_entry_cost = spread_cost + crypto_fee;
    let total_1month_cost = total_entry_cost + overnight_monthly;
    let cost_pct = total_1month_cost / amount * dec!(100);

    FeeEstimate {
        spread_cost: spread_cost.round_dp(2),
        crypto_fee: crypto_fee.round_dp(2),
        overnight_daily: overnight_daily.round_dp(2),
        overnight_weekly: overnight_weekly.round_dp(2),
        overnight_monthly: overnight_monthly.round_dp(2),
        total_entry_cost: total_entry_cost.round_dp(2),
        total_1month_cost: total_1month_cost.round_dp(2),
        cost_pct: cost_pct.round_dp(4),
    }
}

/// Fee estimate for a concrete symbol, priced from the live quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFeeQuote {
    pub symbol: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub leverage: Decimal,
    pub asset_class: AssetClass,
    pub spread_pct: Decimal,
    /// Mid price, absent when no quote was returned
    pub price: Option<Decimal>,
    pub fees: FeeEstimate,
}

/// Resolve `symbol`, read its spread from the current quote and estimate fees.
/// Falls back to a 0.1% spread when the quote is missing.
pub async fn estimate_trade_fees(
    market: &dyn MarketDataSource,
    symbol: &str,
    amount: Decimal,
    direction: Direction,
    leverage: Decimal,
) -> Result<TradeFeeQuote> {
    let instrument = market
        .resolve_symbol(symbol)
        .await?
        .ok_or_else(|| anyhow!("Instrument '{}' not found", symbol))?;

    let rate = market.get_rate(instrument.instrument_id).await?;
    let spread_pct = rate
        .as_ref()
        .and_then(|r| Decimal::from_f64(r.spread_pct()))
        .unwrap_or(FALLBACK_SPREAD_PCT);
    let price = rate
        .as_ref()
        .and_then(|r| Decimal::from_f64(r.mid()))
        .map(|p| p.round_dp(4));

    let asset_class = instrument
        .instrument_type
        .map(AssetClass::from_broker_id)
        .unwrap_or(AssetClass::Stocks);
    let fees = estimate_fees(amount, spread_pct, asset_class, leverage, direction == Direction::Sell);

    tracing::debug!(
        symbol = %symbol,
        asset_class = ?asset_class,
        total_1month_cost = %fees.total_1month_cost,
        "fee estimate"
    );

    Ok(TradeFeeQuote {
        symbol: symbol.to_string(),
        amount,
        direction,
        leverage,
        asset_class,
        spread_pct: spread_pct.round_dp(4),
        price,
        fees,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_no_leverage() {
        let fee = estimate_fees(dec!(500), dec!(0.05), AssetClass::Stocks, Decimal::ONE, false);
        assert_eq!(fee.spread_cost, dec!(0.25));
        assert_eq!(fee.crypto_fee, Decimal::ZERO);
        assert_eq!(fee.overnight_daily, Decimal::ZERO);
        assert_eq!(fee.total_entry_cost, dec!(0.25));
        assert_eq!(fee.total_1month_cost, dec!(0.25));
    }

    #[test]
    fn test_stock_with_leverage() {
        let fee = estimate_fees(dec!(500), dec!(0.05), AssetClass::Stocks, dec!(2), false);
        // 1000 notional * 6.4% / 365
        assert_eq!(fee.overnight_daily, dec!(0.18));
        assert_eq!(fee.overnight_weekly, dec!(1.23));
        assert_eq!(fee.overnight_monthly, dec!(5.26));
        assert_eq!(fee.total_1month_cost, dec!(5.51));
    }

    #[test]
    fn test_short_is_cfd() {
        let fee = estimate_fees(dec!(500), dec!(0.05), AssetClass::Stocks, Decimal::ONE, true);
        assert!(fee.overnight_daily > Decimal::ZERO);
    }

    #[test]
    fn test_crypto_fees() {
        let spot = estimate_fees(dec!(1000), dec!(0.5), AssetClass::Crypto, Decimal::ONE, false);
        assert_eq!(spot.crypto_fee, dec!(10));
        assert_eq!(spot.spread_cost, dec!(5));
        assert_eq!(spot.overnight_daily, Decimal::ZERO);
        assert_eq!(spot.total_entry_cost, dec!(15));

        let cfd = estimate_fees(dec!(1000), dec!(0.5), AssetClass::Crypto, dec!(2), false);
        assert_eq!(cfd.crypto_fee, Decimal::ZERO);
        // 2000 * 5% / 365
        assert_eq!(cfd.overnight_daily, dec!(0.27));
    }

    #[test]
    fn test_zero_amount() {
        let fee = estimate_fees(Decimal::ZERO, dec!(0.1), AssetClass::Stocks, Decimal::ONE, false);
        assert_eq!(fee, FeeEstimate::default());
        let negative = estimate_fees(dec!(-10), dec!(0.1), AssetClass::Forex, dec!(5), true);
        assert_eq!(negative.total_1month_cost, Decimal::ZERO);
    }

    #[test]
    fn test_cost_pct() {
        let fee = estimate_fees(dec!(1000), dec!(0.1), AssetClass::Stocks, Decimal::ONE, false);
        assert_eq!(fee.cost_pct, dec!(0.1));
    }

    #[test]
    fn test_asset_class_mapping() {
        assert_eq!(AssetClass::from_broker_id(5), AssetClass::Stocks);
        assert_eq!(AssetClass::from_broker_id(10), AssetClass::Etf);
        assert_eq!(AssetClass::from_broker_id(6), AssetClass::Indices);
        assert_eq!(AssetClass::from_broker_id(3), AssetClass::Forex);
        assert_eq!(AssetClass::from_broker_id(2), AssetClass::Commodities);
        assert_eq!(AssetClass::from_broker_id(4), AssetClass::Crypto);
        assert_eq!(AssetClass::from_broker_id(73), AssetClass::Crypto);
        assert_eq!(AssetClass::from_broker_id(999), AssetClass::Stocks);
    }

    #[test]
    fn test_forex_rate_lower_than_stocks() {
        let fx = estimate_fees(dec!(1000), Decimal::ZERO, AssetClass::Forex, dec!(2), false);
        let stock = estimate_fees(dec!(1000), Decimal::ZERO, AssetClass::Stocks, dec!(2), false);
        assert!(fx.overnight_monthly < stock.overnight_monthly);
    }
}
