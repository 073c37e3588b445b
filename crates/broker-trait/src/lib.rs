use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use analysis_core::{Bar, Direction, RateQuote, Timeframe};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Portfolio types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: i64,
    pub instrument_id: i64,
    pub is_buy: bool,
    /// Invested amount in account currency
    pub amount: f64,
    pub open_rate: f64,
    pub current_rate: Option<f64>,
    pub net_profit: f64,
    pub leverage: f64,
}

impl Position {
    pub fn direction(&self) -> Direction {
        if self.is_buy {
            Direction::Buy
        } else {
            Direction::Sell
        }
    }

    pub fn pnl_pct(&self) -> f64 {
        if self.amount == 0.0 {
            return 0.0;
        }
        self.net_profit / self.amount * 100.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub positions: Vec<Position>,
    pub total_invested: f64,
    pub total_pnl: f64,
    pub cash_available: f64,
}

impl PortfolioSnapshot {
    pub fn total_value(&self) -> f64 {
        self.total_invested + self.total_pnl + self.cash_available
    }

    /// Fraction of total value currently invested (0 for an empty account)
    pub fn exposure(&self) -> f64 {
        let total = self.total_value();
        if total <= 0.0 {
            return 0.0;
        }
        self.total_invested / total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_id: i64,
    pub symbol: String,
    pub name: String,
    /// Broker asset-class id
    pub instrument_type: Option<i64>,
}

// ---------------------------------------------------------------------------
// Trade log types
// ---------------------------------------------------------------------------

/// Account the daily-loss aggregate is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Demo,
    Real,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Demo => "demo",
            TradingMode::Real => "real",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(TradingMode::Demo),
            "real" => Ok(TradingMode::Real),
            other => Err(anyhow!("unknown trading mode '{}' (expected demo|real)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Executed,
    Rejected,
    Error,
}

/// One trade attempt as recorded by the log sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub timestamp: DateTime<Utc>,
    pub instrument_id: Option<i64>,
    pub symbol: String,
    pub direction: Direction,
    pub amount: f64,
    pub status: TradeStatus,
    pub result: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub mode: TradingMode,
}

/// Realized outcome of a closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClose {
    pub timestamp: DateTime<Utc>,
    pub position_id: i64,
    pub instrument_id: Option<i64>,
    pub symbol: Option<String>,
    /// Unknown when the position was not in the portfolio snapshot
    pub pnl: Option<f64>,
    pub reason: Option<String>,
    pub mode: TradingMode,
}

// ---------------------------------------------------------------------------
// Order types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub instrument_id: i64,
    pub is_buy: bool,
    pub amount: f64,
    pub leverage: u32,
    pub stop_loss_rate: f64,
    pub take_profit_rate: f64,
    pub is_tsl_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub position_id: Option<i64>,
    /// Pending order id (limit orders)
    pub order_id: Option<i64>,
    /// Raw broker response
    pub raw: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Look up an instrument by ticker (None if the broker does not list it)
    async fn resolve_symbol(&self, symbol: &str) -> Result<Option<Instrument>>;

    /// Current quotes; may return fewer than requested
    async fn get_rates(&self, instrument_ids: &[i64]) -> Result<Vec<RateQuote>>;

    /// Most-recent-last candles; may be empty
    async fn get_candles(&self, instrument_id: i64, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>>;

    /// Quote for a single instrument, `None` when the feed omitted it
    async fn get_rate(&self, instrument_id: i64) -> Result<Option<RateQuote>> {
        let rates = self.get_rates(&[instrument_id]).await?;
        Ok(rates.into_iter().find(|r| r.instrument_id == instrument_id))
    }
}

#[async_trait]
pub trait PortfolioSource: Send + Sync {
    /// Fresh broker-side snapshot, no caching
    async fn get_portfolio(&self) -> Result<PortfolioSnapshot>;
}

#[async_trait]
pub trait TradeLogSink: Send + Sync {
    async fn log_trade(&self, entry: TradeLogEntry) -> Result<()>;

    /// Record a position close; feeds `realized_pnl_today`
    async fn log_close(&self, close: PositionClose) -> Result<()>;

    /// Sum of realized P&L from positions closed today in `mode`
    async fn realized_pnl_today(&self, mode: TradingMode) -> Result<f64>;
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn open_position(&self, ticket: &OrderTicket) -> Result<OrderReceipt>;

    /// Resting entry order that fills at `limit_rate`
    async fn place_limit_order(&self, ticket: &OrderTicket, limit_rate: f64) -> Result<OrderReceipt>;

    /// Close an open position; returns the raw broker response
    async fn close_position(&self, position_id: i64, instrument_id: i64) -> Result<serde_json::Value>;

    /// Executor name for logging
    fn executor_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// In-memory trade log
// ---------------------------------------------------------------------------

/// Process-local trade log, useful for paper runs and tests
#[derive(Debug, Default)]
pub struct InMemoryTradeLog {
    trades: Mutex<Vec<TradeLogEntry>>,
    closes: Mutex<Vec<PositionClose>>,
}

impl InMemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent first
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeLogEntry>> {
        let trades = self.trades.lock().map_err(|_| anyhow!("trade log lock poisoned"))?;
        Ok(trades.iter().rev().take(limit).cloned().collect())
    }

    /// Most recent first
    pub fn recent_closes(&self, limit: usize) -> Result<Vec<PositionClose>> {
        let closes = self.closes.lock().map_err(|_| anyhow!("trade log lock poisoned"))?;
        Ok(closes.iter().rev().take(limit).cloned().collect())
    }

    /// Realized P&L for closes on `day` in `mode`; closes without a P&L count as 0
    pub fn realized_pnl_on(&self, day: NaiveDate, mode: TradingMode) -> Result<f64> {
        let closes = self.closes.lock().map_err(|_| anyhow!("trade log lock poisoned"))?;
        Ok(closes
            .iter()
            .filter(|c| c.mode == mode && c.timestamp.date_naive() == day)
            .filter_map(|c| c.pnl)
            .sum())
    }
}

#[async_trait]
impl TradeLogSink for InMemoryTradeLog {
    async fn log_trade(&self, entry: TradeLogEntry) -> Result<()> {
        tracing::debug!(
            symbol = %entry.symbol,
            status = ?entry.status,
            amount = entry.amount,
            "trade logged"
        );
        self.trades
            .lock()
            .map_err(|_| anyhow!("trade log lock poisoned"))?
            .push(entry);
        Ok(())
    }

    async fn log_close(&self, close: PositionClose) -> Result<()> {
        tracing::debug!(
            position_id = close.position_id,
            pnl = ?close.pnl,
            "position close logged"
        );
        self.closes
            .lock()
            .map_err(|_| anyhow!("trade log lock poisoned"))?
            .push(close);
        Ok(())
    }

    async fn realized_pnl_today(&self, mode: TradingMode) -> Result<f64> {
        self.realized_pnl_on(Utc::now().date_naive(), mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(symbol: &str, status: TradeStatus) -> TradeLogEntry {
        TradeLogEntry {
            timestamp: Utc::now(),
            instrument_id: Some(1001),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            amount: 500.0,
            status,
            result: None,
            reason: None,
            mode: TradingMode::Demo,
        }
    }

    fn close(pnl: Option<f64>, mode: TradingMode, at: DateTime<Utc>) -> PositionClose {
        PositionClose {
            timestamp: at,
            position_id: 1,
            instrument_id: Some(1001),
            symbol: Some("AAPL".to_string()),
            pnl,
            reason: None,
            mode,
        }
    }

    #[test]
    fn test_portfolio_total_value() {
        let snapshot = PortfolioSnapshot {
            positions: vec![],
            total_invested: 6_000.0,
            total_pnl: -500.0,
            cash_available: 4_500.0,
        };
        assert_eq!(snapshot.total_value(), 10_000.0);
        assert_eq!(snapshot.exposure(), 0.6);
        assert_eq!(PortfolioSnapshot::default().exposure(), 0.0);
    }

    #[test]
    fn test_position_direction_and_pnl() {
        let pos = Position {
            position_id: 7,
            instrument_id: 1001,
            is_buy: false,
            amount: 200.0,
            open_rate: 50.0,
            current_rate: Some(45.0),
            net_profit: 20.0,
            leverage: 1.0,
        };
        assert_eq!(pos.direction(), Direction::Sell);
        assert_eq!(pos.pnl_pct(), 10.0);
    }

    #[test]
    fn test_trading_mode_parse() {
        assert_eq!("DEMO".parse::<TradingMode>().unwrap(), TradingMode::Demo);
        assert_eq!(" real ".parse::<TradingMode>().unwrap(), TradingMode::Real);
        assert!("paper".parse::<TradingMode>().is_err());
    }

    #[test]
    fn test_trade_status_serializes_lowercase() {
        let json = serde_json::to_string(&TradeStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
    }

    #[tokio::test]
    async fn test_in_memory_log_keeps_trades() {
        let log = InMemoryTradeLog::new();
        log.log_trade(entry("AAPL", TradeStatus::Executed)).await.unwrap();
        log.log_trade(entry("MSFT", TradeStatus::Rejected)).await.unwrap();

        let recent = log.recent_trades(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].symbol, "MSFT");
        assert_eq!(recent[1].status, TradeStatus::Executed);
    }

    #[tokio::test]
    async fn test_realized_pnl_filters_mode_and_day() {
        let log = InMemoryTradeLog::new();
        let now = Utc::now();
        log.log_close(close(Some(-120.0), TradingMode::Demo, now)).await.unwrap();
        log.log_close(close(Some(40.0), TradingMode::Demo, now)).await.unwrap();
        log.log_close(close(None, TradingMode::Demo, now)).await.unwrap();
        log.log_close(close(Some(-999.0), TradingMode::Real, now)).await.unwrap();
        log.log_close(close(Some(-999.0), TradingMode::Demo, now - Duration::days(2)))
            .await
            .unwrap();

        let pnl = log.realized_pnl_today(TradingMode::Demo).await.unwrap();
        assert_eq!(pnl, -80.0);
        let real = log.realized_pnl_on(now.date_naive(), TradingMode::Real).unwrap();
        assert_eq!(real, -999.0);

        let closes = log.recent_closes(2).unwrap();
        assert_eq!(closes.len(), 2);
        assert_eq!(closes[0].pnl, Some(-999.0));
    }
}
