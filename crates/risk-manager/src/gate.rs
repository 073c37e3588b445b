use std::sync::Arc;

use analysis_core::{Bar, Direction};
use broker_trait::{
    MarketDataSource, OrderExecutor, OrderTicket, PositionClose, TradeLogEntry, TradeLogSink,
    TradeStatus,
};
use chrono::Utc;
use position_sizer::{
    calculate_atr_stops, calculate_chandelier_stops, calculate_pct_stops, AtrStopParams,
    ChandelierParams,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::manager::RiskManager;
use crate::models::RiskLimits;

/// Bars needed before the Chandelier stop is attempted
const CHANDELIER_MIN_BARS: usize = 22;

/// One requested entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequest {
    pub symbol: String,
    pub amount: f64,
    pub direction: Direction,
    /// Percent stop; the active limits' default when absent or not positive
    pub sl_pct: Option<f64>,
    pub tp_pct: Option<f64>,
    pub leverage: f64,
    pub reason: Option<String>,
    /// ATR used for the ATR stop when no Chandelier series is given
    pub atr: Option<f64>,
    pub trailing_sl: bool,
    /// Recent bars, most-recent-last, for the Chandelier stop
    pub bars: Option<Vec<Bar>>,
}

impl OpenRequest {
    pub fn new(symbol: impl Into<String>, amount: f64, direction: Direction) -> Self {
        Self {
            symbol: symbol.into(),
            amount,
            direction,
            sl_pct: None,
            tp_pct: None,
            leverage: 1.0,
            reason: None,
            atr: None,
            trailing_sl: false,
            bars: None,
        }
    }

    pub fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars = Some(bars);
        self
    }

    pub fn with_atr(mut self, atr: f64) -> Self {
        self.atr = Some(atr);
        self
    }

    pub fn with_stops(mut self, sl_pct: f64, tp_pct: f64) -> Self {
        self.sl_pct = Some(sl_pct);
        self.tp_pct = Some(tp_pct);
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub success: bool,
    pub position_id: Option<i64>,
    /// Pending order id for limit entries
    pub order_id: Option<i64>,
    pub message: String,
    /// Stop method tag, set once stops were computed
    pub sl_method: Option<String>,
    pub ticket: Option<OrderTicket>,
    pub raw: Option<serde_json::Value>,
}

impl TradeOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            position_id: None,
            order_id: None,
            message: message.into(),
            sl_method: None,
            ticket: None,
            raw: None,
        }
    }
}

/// Runs every entry through the risk check, picks stops and submits the order
pub struct TradeGate {
    market: Arc<dyn MarketDataSource>,
    executor: Arc<dyn OrderExecutor>,
    trade_log: Arc<dyn TradeLogSink>,
    risk: RiskManager,
    limits: RiskLimits,
}

impl TradeGate {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        executor: Arc<dyn OrderExecutor>,
        trade_log: Arc<dyn TradeLogSink>,
        risk: RiskManager,
        limits: RiskLimits,
    ) -> Self {
        Self {
            market,
            executor,
            trade_log,
            risk,
            limits,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    async fn record(
        &self,
        req: &OpenRequest,
        instrument_id: Option<i64>,
        status: TradeStatus,
        result: Option<serde_json::Value>,
    ) {
        let entry = TradeLogEntry {
            timestamp: Utc::now(),
            instrument_id,
            symbol: req.symbol.clone(),
            direction: req.direction,
            amount: req.amount,
            status,
            result,
            reason: req.reason.clone(),
            mode: self.risk.mode(),
        };
        if let Err(e) = self.trade_log.log_trade(entry).await {
            tracing::warn!(symbol = %req.symbol, error = %e, "failed to write trade log");
        }
    }

    /// Percent stop and target, falling back to the limits' defaults
    fn pct_levels(&self, req: &OpenRequest) -> (f64, f64) {
        let sl_pct = req
            .sl_pct
            .filter(|v| *v > 0.0)
            .unwrap_or(self.limits.default_stop_loss_pct);
        let tp_pct = req
            .tp_pct
            .filter(|v| *v > 0.0)
            .unwrap_or(self.limits.default_take_profit_pct);
        (sl_pct, tp_pct)
    }

    /// Resolve the symbol and run the risk check. `Err` carries the
    /// already-logged failure.
    async fn admit(&self, req: &OpenRequest) -> Result<i64, TradeOutcome> {
        let instrument = match self.market.resolve_symbol(&req.symbol).await {
            Ok(Some(i)) => i,
            Ok(None) => {
                self.record(req, None, TradeStatus::Error, None).await;
                return Err(TradeOutcome::failed(format!("Instrument '{}' not found", req.symbol)));
            }
            Err(e) => {
                tracing::error!(symbol = %req.symbol, error = %e, "symbol lookup failed");
                self.record(req, None, TradeStatus::Error, Some(json!({ "error": e.to_string() })))
                    .await;
                return Err(TradeOutcome::failed(e.to_string()));
            }
        };
        let iid = instrument.instrument_id;

        let risk = self
            .risk
            .check_trade(&req.symbol, req.amount, req.direction, req.leverage, &self.limits)
            .await;
        if !risk.passed {
            self.record(
                req,
                Some(iid),
                TradeStatus::Rejected,
                Some(json!({ "violations": risk.violations })),
            )
            .await;
            return Err(TradeOutcome::failed(risk.summary()));
        }
        Ok(iid)
    }

    pub async fn open_position(&self, req: OpenRequest) -> TradeOutcome {
        let (sl_pct, tp_pct) = self.pct_levels(&req);
        let iid = match self.admit(&req).await {
            Ok(iid) => iid,
            Err(outcome) => return outcome,
        };

        let rate = match self.market.get_rate(iid).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                self.record(&req, Some(iid), TradeStatus::Error, None).await;
                return TradeOutcome::failed("Could not get current rate");
            }
            Err(e) => {
                tracing::warn!(symbol = %req.symbol, error = %e, "rate fetch failed");
                self.record(&req, Some(iid), TradeStatus::Error, None).await;
                return TradeOutcome::failed("Could not get current rate");
            }
        };

        let is_buy = req.direction.is_buy();
        let price = if is_buy { rate.ask } else { rate.bid };

        let pct = match calculate_pct_stops(price, req.direction, sl_pct, tp_pct) {
            Ok(s) => s,
            Err(e) => {
                self.record(&req, Some(iid), TradeStatus::Error, Some(json!({ "error": e.to_string() })))
                    .await;
                return TradeOutcome::failed(format!("Invalid quote for {}: {}", req.symbol, e));
            }
        };
        let mut tp_rate = pct.tp_rate.unwrap_or(price);
        let mut sl_rate = pct.sl_rate;
        let mut sl_method = "pct".to_string();
        let mut trailing_sl = req.trailing_sl;

        // Chandelier > ATR > percentage
        match (&req.bars, req.atr) {
            (Some(bars), _) if bars.len() >= CHANDELIER_MIN_BARS => {
                match calculate_chandelier_stops(bars, price, req.direction, &ChandelierParams::default()) {
                    Ok(stops) => {
                        sl_rate = stops.sl_rate;
                        sl_method = stops.method.as_str().to_string();
                        if stops.trend_up == Some(true) && is_buy {
                            trailing_sl = true;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            symbol = %req.symbol,
                            error = %e,
                            "chandelier stop failed, falling back to percentage stop"
                        );
                        sl_method = format!("pct-fallback({})", e);
                    }
                }
            }
            (_, Some(atr)) if atr > 0.0 => {
                if let Ok(stops) = calculate_atr_stops(price, atr, req.direction, &AtrStopParams::default()) {
                    sl_rate = stops.sl_rate;
                    tp_rate = stops.tp_rate.unwrap_or(tp_rate);
                    sl_method = stops.method.as_str().to_string();
                }
            }
            _ => {}
        }

        let ticket = OrderTicket {
            instrument_id: iid,
            is_buy,
            amount: req.amount,
            leverage: req.leverage.max(1.0) as u32,
            stop_loss_rate: sl_rate,
            take_profit_rate: tp_rate,
            is_tsl_enabled: trailing_sl,
        };

        match self.executor.open_position(&ticket).await {
            Ok(receipt) => {
                let message = format!(
                    "Opened {} {} for ${} [SL: {}]",
                    req.direction, req.symbol, req.amount, sl_method
                );
                tracing::info!(
                    symbol = %req.symbol,
                    executor = self.executor.executor_name(),
                    sl_rate,
                    tp_rate,
                    "{}",
                    message
                );
                self.record(&req, Some(iid), TradeStatus::Executed, Some(receipt.raw.clone()))
                    .await;
                TradeOutcome {
                    success: true,
                    position_id: receipt.position_id,
                    order_id: receipt.order_id,
                    message,
                    sl_method: Some(sl_method),
                    ticket: Some(ticket),
                    raw: Some(receipt.raw),
                }
            }
            Err(e) => {
                tracing::error!(symbol = %req.symbol, error = %e, "open_position failed");
                self.record(&req, Some(iid), TradeStatus::Error, Some(json!({ "error": e.to_string() })))
                    .await;
                TradeOutcome {
                    success: false,
                    position_id: None,
                    order_id: None,
                    message: e.to_string(),
                    sl_method: Some(sl_method),
                    ticket: Some(ticket),
                    raw: None,
                }
            }
        }
    }

    /// Resting entry at `limit_price`. Runs the same risk check as a market
    /// entry; stops are always percentage offsets from the limit price and
    /// the trailing stop is never enabled.
    pub async fn create_limit_order(&self, req: OpenRequest, limit_price: f64) -> TradeOutcome {
        let (sl_pct, tp_pct) = self.pct_levels(&req);
        let iid = match self.admit(&req).await {
            Ok(iid) => iid,
            Err(outcome) => return outcome,
        };

        let stops = match calculate_pct_stops(limit_price, req.direction, sl_pct, tp_pct) {
            Ok(s) => s,
            Err(e) => {
                self.record(&req, Some(iid), TradeStatus::Error, Some(json!({ "error": e.to_string() })))
                    .await;
                return TradeOutcome::failed(format!("Invalid limit price for {}: {}", req.symbol, e));
            }
        };

        let ticket = OrderTicket {
            instrument_id: iid,
            is_buy: req.direction.is_buy(),
            amount: req.amount,
            leverage: req.leverage.max(1.0) as u32,
            stop_loss_rate: stops.sl_rate,
            take_profit_rate: stops.tp_rate.unwrap_or(limit_price),
            is_tsl_enabled: false,
        };

        match self.executor.place_limit_order(&ticket, limit_price).await {
            Ok(receipt) => {
                let message = format!(
                    "Limit order: {} {} ${} @ ${}",
                    req.direction, req.symbol, req.amount, limit_price
                );
                tracing::info!(
                    symbol = %req.symbol,
                    executor = self.executor.executor_name(),
                    order_id = ?receipt.order_id,
                    "{}",
                    message
                );
                let logged = OpenRequest {
                    reason: Some(
                        format!("LIMIT@{} {}", limit_price, req.reason.as_deref().unwrap_or_default())
                            .trim_end()
                            .to_string(),
                    ),
                    ..req.clone()
                };
                self.record(&logged, Some(iid), TradeStatus::Executed, Some(receipt.raw.clone()))
                    .await;
                TradeOutcome {
                    success: true,
                    position_id: receipt.position_id,
                    order_id: receipt.order_id,
                    message,
                    sl_method: Some(stops.method.as_str().to_string()),
                    ticket: Some(ticket),
                    raw: Some(receipt.raw),
                }
            }
            Err(e) => {
                tracing::error!(symbol = %req.symbol, limit_price, error = %e, "create_limit_order failed");
                self.record(&req, Some(iid), TradeStatus::Error, Some(json!({ "error": e.to_string() })))
                    .await;
                TradeOutcome {
                    success: false,
                    position_id: None,
                    order_id: None,
                    message: e.to_string(),
                    sl_method: Some(stops.method.as_str().to_string()),
                    ticket: Some(ticket),
                    raw: None,
                }
            }
        }
    }

    async fn record_close(
        &self,
        position_id: i64,
        instrument_id: i64,
        pnl: Option<f64>,
        reason: Option<String>,
    ) {
        let close = PositionClose {
            timestamp: Utc::now(),
            position_id,
            instrument_id: Some(instrument_id),
            symbol: None,
            pnl,
            reason,
            mode: self.risk.mode(),
        };
        if let Err(e) = self.trade_log.log_close(close).await {
            tracing::warn!(position_id, error = %e, "failed to write position close");
        }
    }

    /// Close a position and record the close with its P&L from the current
    /// portfolio snapshot. The instrument comes from the snapshot when not
    /// given.
    pub async fn close_position(
        &self,
        position_id: i64,
        instrument_id: Option<i64>,
        reason: Option<String>,
    ) -> TradeOutcome {
        let held = match self.risk.portfolio().get_portfolio().await {
            Ok(snapshot) => snapshot
                .positions
                .into_iter()
                .find(|p| p.position_id == position_id),
            Err(e) => {
                tracing::warn!(position_id, error = %e, "portfolio fetch failed before close");
                None
            }
        };

        let iid = match instrument_id.or_else(|| held.as_ref().map(|p| p.instrument_id)) {
            Some(iid) => iid,
            None => {
                return TradeOutcome::failed(format!(
                    "Could not find instrument_id for position {}. Pass the instrument id explicitly.",
                    position_id
                ));
            }
        };

        match self.executor.close_position(position_id, iid).await {
            Ok(raw) => {
                let pnl = held.as_ref().map(|p| p.net_profit);
                tracing::info!(
                    position_id,
                    instrument_id = iid,
                    pnl = ?pnl,
                    pnl_pct = ?held.as_ref().map(|p| p.pnl_pct()),
                    "position closed"
                );
                self.record_close(position_id, iid, pnl, reason).await;
                TradeOutcome {
                    success: true,
                    position_id: Some(position_id),
                    order_id: None,
                    message: format!("Closed position {}", position_id),
                    sl_method: None,
                    ticket: None,
                    raw: Some(raw),
                }
            }
            Err(e) => {
                tracing::error!(position_id, error = %e, "close_position failed");
                self.record_close(position_id, iid, None, Some(format!("FAILED: {}", e)))
                    .await;
                TradeOutcome::failed(e.to_string())
            }
        }
    }
}
