#[cfg(test)]
mod risk_manager_tests {
    use std::sync::{Arc, Mutex};

    use analysis_core::{Bar, Direction, RateQuote, Timeframe};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use broker_trait::{
        InMemoryTradeLog, Instrument, MarketDataSource, OrderExecutor, OrderReceipt, OrderTicket,
        PortfolioSnapshot, PortfolioSource, Position, PositionClose, TradeLogEntry, TradeLogSink,
        TradeStatus, TradingMode,
    };
    use chrono::{Duration, Utc};
    use serde_json::json;

    use crate::gate::{OpenRequest, TradeGate};
    use crate::manager::RiskManager;
    use crate::models::{RiskCheckResult, RiskLimits};

    struct FakePortfolio {
        snapshot: Option<PortfolioSnapshot>,
    }

    #[async_trait]
    impl PortfolioSource for FakePortfolio {
        async fn get_portfolio(&self) -> Result<PortfolioSnapshot> {
            self.snapshot
                .clone()
                .ok_or_else(|| anyhow!("connection refused"))
        }
    }

    struct BrokenLog;

    #[async_trait]
    impl TradeLogSink for BrokenLog {
        async fn log_trade(&self, _entry: TradeLogEntry) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        async fn log_close(&self, _close: PositionClose) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        async fn realized_pnl_today(&self, _mode: TradingMode) -> Result<f64> {
            Err(anyhow!("database locked"))
        }
    }

    struct FakeMarket {
        quote: Option<RateQuote>,
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn resolve_symbol(&self, symbol: &str) -> Result<Option<Instrument>> {
            if symbol == "XYZ" {
                return Ok(None);
            }
            Ok(Some(Instrument {
                instrument_id: 1001,
                symbol: symbol.to_string(),
                name: format!("{} Inc", symbol),
                instrument_type: Some(5),
            }))
        }

        async fn get_rates(&self, _instrument_ids: &[i64]) -> Result<Vec<RateQuote>> {
            Ok(self.quote.iter().cloned().collect())
        }

        async fn get_candles(&self, _instrument_id: i64, _timeframe: Timeframe, _count: usize) -> Result<Vec<Bar>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        tickets: Mutex<Vec<OrderTicket>>,
        limit_orders: Mutex<Vec<(OrderTicket, f64)>>,
        closes: Mutex<Vec<(i64, i64)>>,
        fail: bool,
    }

    #[async_trait]
    impl OrderExecutor for RecordingExecutor {
        async fn open_position(&self, ticket: &OrderTicket) -> Result<OrderReceipt> {
            if self.fail {
                return Err(anyhow!("market closed"));
            }
            self.tickets.lock().unwrap().push(ticket.clone());
            Ok(OrderReceipt {
                position_id: Some(555),
                order_id: None,
                raw: json!({ "PositionID": 555 }),
            })
        }

        async fn place_limit_order(&self, ticket: &OrderTicket, limit_rate: f64) -> Result<OrderReceipt> {
            if self.fail {
                return Err(anyhow!("market closed"));
            }
            self.limit_orders.lock().unwrap().push((ticket.clone(), limit_rate));
            Ok(OrderReceipt {
                position_id: None,
                order_id: Some(777),
                raw: json!({ "OrderID": 777 }),
            })
        }

        async fn close_position(&self, position_id: i64, instrument_id: i64) -> Result<serde_json::Value> {
            if self.fail {
                return Err(anyhow!("market closed"));
            }
            self.closes.lock().unwrap().push((position_id, instrument_id));
            Ok(json!({ "status": "ok" }))
        }

        fn executor_name(&self) -> &str {
            "recording"
        }
    }

    fn position(id: i64, amount: f64) -> Position {
        Position {
            position_id: id,
            instrument_id: 1000 + id,
            is_buy: true,
            amount,
            open_rate: 100.0,
            current_rate: Some(100.0),
            net_profit: 0.0,
            leverage: 1.0,
        }
    }

    /// 10k account with `invested` spread over `count` positions
    fn snapshot(invested: f64, count: usize) -> PortfolioSnapshot {
        let per = if count == 0 { 0.0 } else { invested / count as f64 };
        PortfolioSnapshot {
            positions: (0..count as i64).map(|i| position(i, per)).collect(),
            total_invested: invested,
            total_pnl: 0.0,
            cash_available: 10_000.0 - invested,
        }
    }

    fn setup_manager(snapshot: Option<PortfolioSnapshot>, log: Arc<dyn TradeLogSink>) -> RiskManager {
        RiskManager::new(Arc::new(FakePortfolio { snapshot }), log, TradingMode::Demo)
    }

    fn healthy_manager() -> RiskManager {
        setup_manager(Some(snapshot(2_000.0, 2)), Arc::new(InMemoryTradeLog::new()))
    }

    fn uptrend_bars(count: usize) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(count as i64);
        let step = 60.0 / (count - 1) as f64;
        (0..count)
            .map(|i| {
                let close = 100.0 + step * i as f64;
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn normal_trade_passes() {
        let rm = healthy_manager();
        let check = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(check.passed);
        assert!(check.violations.is_empty());
        assert!(check.warnings.is_empty());
        assert_eq!(check.summary(), "PASSED");
    }

    #[tokio::test]
    async fn amount_below_minimum_rejected() {
        let rm = healthy_manager();
        let check = rm
            .check_trade("AAPL", 5.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check.violations.iter().any(|v| v.contains("below minimum")));
    }

    #[tokio::test]
    async fn amount_above_maximum_rejected() {
        let rm = healthy_manager();
        let check = rm
            .check_trade("AAPL", 1_500.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check.violations.iter().any(|v| v.contains("exceeds maximum")));
        // 15% of a 10k account also breaks the concentration limit
        assert!(check
            .violations
            .contains(&"Position would be 15.0% of portfolio (max 10%)".to_string()));
        assert!(check.summary().starts_with("REJECTED: "));
        assert!(check.summary().contains("; "));
    }

    #[tokio::test]
    async fn leverage_over_limit_rejected_with_warning() {
        let rm = healthy_manager();
        let check = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 2.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check.violations.iter().any(|v| v.starts_with("Leverage 2x")));
        assert!(check
            .warnings
            .contains(&"Leveraged position: overnight fees will apply".to_string()));
    }

    #[tokio::test]
    async fn portfolio_fetch_failure_skips_portfolio_checks() {
        let rm = setup_manager(None, Arc::new(InMemoryTradeLog::new()));
        let check = rm
            .check_trade("AAPL", 500.0, Direction::Sell, 1.0, &RiskLimits::default())
            .await;

        assert!(check.passed);
        assert_eq!(check.warnings.len(), 1);
        assert!(check.warnings[0].starts_with("Could not fetch portfolio for risk check"));
        // Early return: the short-position warning is never reached
        assert_eq!(check.summary(), "PASSED with 1 warning(s)");

        let bad = rm
            .check_trade("AAPL", 5.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;
        assert!(!bad.passed);
    }

    #[tokio::test]
    async fn max_positions_rejected() {
        let rm = setup_manager(Some(snapshot(2_000.0, 20)), Arc::new(InMemoryTradeLog::new()));
        let check = rm
            .check_trade("AAPL", 100.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check
            .violations
            .contains(&"Already at max positions (20/20)".to_string()));
    }

    #[tokio::test]
    async fn total_exposure_rejected() {
        let rm = setup_manager(Some(snapshot(8_500.0, 5)), Arc::new(InMemoryTradeLog::new()));
        let check = rm
            .check_trade("AAPL", 600.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check
            .violations
            .contains(&"Total exposure would be 91.0% (max 90%)".to_string()));
        assert!(check
            .warnings
            .contains(&"High exposure: 91.0% of portfolio".to_string()));
    }

    #[tokio::test]
    async fn high_exposure_warns_without_rejecting() {
        let rm = setup_manager(Some(snapshot(7_800.0, 5)), Arc::new(InMemoryTradeLog::new()));
        let check = rm
            .check_trade("AAPL", 300.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(check.passed);
        assert_eq!(check.warnings.len(), 1);
        assert!(check.warnings[0].starts_with("High exposure"));
    }

    #[tokio::test]
    async fn daily_loss_limit_rejected() {
        let log = Arc::new(InMemoryTradeLog::new());
        log.log_close(PositionClose {
            timestamp: Utc::now(),
            position_id: 9,
            instrument_id: None,
            symbol: Some("TSLA".to_string()),
            pnl: Some(-300.0),
            reason: None,
            mode: TradingMode::Demo,
        })
        .await
        .unwrap();
        let rm = setup_manager(Some(snapshot(2_000.0, 2)), log);

        let check = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(!check.passed);
        assert!(check
            .violations
            .contains(&"Daily loss 3.0% exceeds limit 3%".to_string()));

        // The aggressive profile tolerates 5%
        let relaxed = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 1.0, &RiskLimits::aggressive())
            .await;
        assert!(relaxed.passed);
    }

    #[tokio::test]
    async fn daily_loss_in_other_mode_ignored() {
        let log = Arc::new(InMemoryTradeLog::new());
        log.log_close(PositionClose {
            timestamp: Utc::now(),
            position_id: 9,
            instrument_id: None,
            symbol: Some("TSLA".to_string()),
            pnl: Some(-900.0),
            reason: None,
            mode: TradingMode::Real,
        })
        .await
        .unwrap();
        let rm = setup_manager(Some(snapshot(2_000.0, 2)), log);

        let check = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;
        assert!(check.passed);
    }

    #[tokio::test]
    async fn daily_loss_lookup_failure_ignored() {
        let rm = setup_manager(Some(snapshot(2_000.0, 2)), Arc::new(BrokenLog));
        let check = rm
            .check_trade("AAPL", 500.0, Direction::Buy, 1.0, &RiskLimits::default())
            .await;

        assert!(check.passed);
        assert!(check.warnings.is_empty());
    }

    #[tokio::test]
    async fn short_position_warns() {
        let rm = healthy_manager();
        let check = rm
            .check_trade("AAPL", 500.0, Direction::Sell, 1.0, &RiskLimits::default())
            .await;

        assert!(check.passed);
        assert_eq!(
            check.warnings,
            vec!["Short position: overnight fees will apply (CFD)".to_string()]
        );
        assert_eq!(check.summary(), "PASSED with 1 warning(s)");
    }

    #[test]
    fn aggressive_limits_override_defaults() {
        let aggressive = RiskLimits::aggressive();
        assert_eq!(aggressive.max_position_pct, 0.20);
        assert_eq!(aggressive.max_single_trade_usd, 5_000.0);
        assert_eq!(aggressive.min_trade_usd, 50.0);
        assert_eq!(aggressive.max_open_positions, 20);
        assert_eq!(aggressive.max_leverage, 1.0);

        assert_eq!(RiskLimits::conservative(), RiskLimits::default());
        assert_eq!(RiskLimits::from_profile("AGGRESSIVE"), Some(aggressive));
        assert!(RiskLimits::from_profile("yolo").is_none());
    }

    #[test]
    fn rejected_summary_joins_violations() {
        let result = RiskCheckResult::new(
            vec!["first".to_string(), "second".to_string()],
            vec!["ignored".to_string()],
        );
        assert!(!result.passed);
        assert_eq!(result.summary(), "REJECTED: first; second");
    }

    // -- trade gate --

    struct GateHarness {
        gate: TradeGate,
        executor: Arc<RecordingExecutor>,
        log: Arc<InMemoryTradeLog>,
    }

    fn setup_gate(quote: Option<RateQuote>, fail_orders: bool) -> GateHarness {
        setup_gate_with(Some(snapshot(2_000.0, 2)), quote, fail_orders)
    }

    fn setup_gate_with(
        portfolio: Option<PortfolioSnapshot>,
        quote: Option<RateQuote>,
        fail_orders: bool,
    ) -> GateHarness {
        let log = Arc::new(InMemoryTradeLog::new());
        let executor = Arc::new(RecordingExecutor {
            fail: fail_orders,
            ..Default::default()
        });
        let risk = setup_manager(portfolio, log.clone());
        let gate = TradeGate::new(
            Arc::new(FakeMarket { quote }),
            executor.clone(),
            log.clone(),
            risk,
            RiskLimits::default(),
        );
        GateHarness { gate, executor, log }
    }

    fn quote(bid: f64, ask: f64) -> Option<RateQuote> {
        Some(RateQuote {
            instrument_id: 1001,
            bid,
            ask,
            last_price: bid,
        })
    }

    #[tokio::test]
    async fn gate_uses_percentage_stops_by_default() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.position_id, Some(555));
        assert_eq!(outcome.message, "Opened BUY AAPL for $500 [SL: pct]");

        let tickets = h.executor.tickets.lock().unwrap();
        let ticket = &tickets[0];
        // Entry at the ask: 101 * (1 - 5%), 101 * (1 + 15%)
        assert!((ticket.stop_loss_rate - 95.95).abs() < 1e-9);
        assert!((ticket.take_profit_rate - 116.15).abs() < 1e-9);
        assert!(!ticket.is_tsl_enabled);

        let logged = h.log.recent_trades(5).unwrap();
        assert_eq!(logged[0].status, TradeStatus::Executed);
        assert_eq!(logged[0].result, Some(json!({ "PositionID": 555 })));
    }

    #[tokio::test]
    async fn gate_short_prices_from_bid() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Sell).with_stops(10.0, 20.0))
            .await;

        assert!(outcome.success);
        let tickets = h.executor.tickets.lock().unwrap();
        assert!(!tickets[0].is_buy);
        assert!((tickets[0].stop_loss_rate - 110.0).abs() < 1e-9);
        assert!((tickets[0].take_profit_rate - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gate_prefers_atr_stops_when_given() {
        let h = setup_gate(quote(99.5, 100.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy).with_atr(2.0))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.sl_method.as_deref(), Some("atr"));
        let tickets = h.executor.tickets.lock().unwrap();
        assert!((tickets[0].stop_loss_rate - 96.0).abs() < 1e-9);
        assert!((tickets[0].take_profit_rate - 106.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gate_prefers_chandelier_with_enough_bars() {
        let bars = uptrend_bars(60);
        let h = setup_gate(quote(160.0, 160.5), false);
        let outcome = h
            .gate
            .open_position(
                OpenRequest::new("AAPL", 500.0, Direction::Buy)
                    .with_bars(bars)
                    .with_atr(2.0),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.sl_method.as_deref(), Some("chandelier"));
        let tickets = h.executor.tickets.lock().unwrap();
        assert!(tickets[0].stop_loss_rate < 160.5);
        // SuperTrend confirms the uptrend, so the trailing stop is switched on
        assert!(tickets[0].is_tsl_enabled);
        // Chandelier gives no target; the percentage target stays
        assert!((tickets[0].take_profit_rate - 184.575).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gate_falls_back_when_chandelier_undefined() {
        let mut bars = uptrend_bars(30);
        if let Some(last) = bars.last_mut() {
            last.high = f64::NAN;
        }
        let h = setup_gate(quote(130.0, 130.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy).with_bars(bars))
            .await;

        assert!(outcome.success);
        let method = outcome.sl_method.unwrap_or_default();
        assert!(method.starts_with("pct-fallback("), "got {}", method);
        let tickets = h.executor.tickets.lock().unwrap();
        assert!((tickets[0].stop_loss_rate - 123.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn gate_rejects_before_submitting() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 5.0, Direction::Buy).with_reason("test"))
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("REJECTED: "));
        assert!(h.executor.tickets.lock().unwrap().is_empty());

        let logged = h.log.recent_trades(5).unwrap();
        assert_eq!(logged[0].status, TradeStatus::Rejected);
        assert_eq!(logged[0].reason.as_deref(), Some("test"));
        assert!(logged[0].result.as_ref().unwrap()["violations"].is_array());
    }

    #[tokio::test]
    async fn gate_errors_without_rate() {
        let h = setup_gate(None, false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Could not get current rate");
        assert_eq!(h.log.recent_trades(1).unwrap()[0].status, TradeStatus::Error);
    }

    #[tokio::test]
    async fn gate_errors_on_unknown_symbol() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("XYZ", 500.0, Direction::Buy))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Instrument 'XYZ' not found");
    }

    #[tokio::test]
    async fn gate_logs_executor_failure() {
        let h = setup_gate(quote(100.0, 101.0), true);
        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "market closed");
        let logged = h.log.recent_trades(1).unwrap();
        assert_eq!(logged[0].status, TradeStatus::Error);
        assert_eq!(logged[0].result, Some(json!({ "error": "market closed" })));
    }

    #[tokio::test]
    async fn limit_order_stops_from_limit_price() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .create_limit_order(OpenRequest::new("AAPL", 500.0, Direction::Buy).with_reason("dip"), 95.0)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.order_id, Some(777));
        assert_eq!(outcome.message, "Limit order: BUY AAPL $500 @ $95");
        assert!(h.executor.tickets.lock().unwrap().is_empty());

        let orders = h.executor.limit_orders.lock().unwrap();
        let (ticket, rate) = &orders[0];
        assert_eq!(*rate, 95.0);
        // 95 * (1 - 5%), 95 * (1 + 15%); the quote plays no part
        assert!((ticket.stop_loss_rate - 90.25).abs() < 1e-9);
        assert!((ticket.take_profit_rate - 109.25).abs() < 1e-9);
        assert!(!ticket.is_tsl_enabled);

        let logged = h.log.recent_trades(1).unwrap();
        assert_eq!(logged[0].status, TradeStatus::Executed);
        assert_eq!(logged[0].reason.as_deref(), Some("LIMIT@95 dip"));
    }

    #[tokio::test]
    async fn limit_order_short_inverts_stops() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .create_limit_order(
                OpenRequest::new("AAPL", 500.0, Direction::Sell).with_stops(10.0, 20.0),
                120.0,
            )
            .await;

        assert!(outcome.success);
        let orders = h.executor.limit_orders.lock().unwrap();
        assert!(!orders[0].0.is_buy);
        assert!((orders[0].0.stop_loss_rate - 132.0).abs() < 1e-9);
        assert!((orders[0].0.take_profit_rate - 96.0).abs() < 1e-9);
        assert_eq!(h.log.recent_trades(1).unwrap()[0].reason.as_deref(), Some("LIMIT@120"));
    }

    #[tokio::test]
    async fn limit_order_runs_risk_check() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .create_limit_order(OpenRequest::new("AAPL", 5.0, Direction::Buy), 95.0)
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.starts_with("REJECTED: "));
        assert!(h.executor.limit_orders.lock().unwrap().is_empty());
        assert_eq!(h.log.recent_trades(1).unwrap()[0].status, TradeStatus::Rejected);
    }

    #[tokio::test]
    async fn limit_order_rejects_bad_limit_price() {
        let h = setup_gate(quote(100.0, 101.0), false);
        for price in [0.0, -5.0, f64::NAN] {
            let outcome = h
                .gate
                .create_limit_order(OpenRequest::new("AAPL", 500.0, Direction::Buy), price)
                .await;
            assert!(!outcome.success);
            assert!(outcome.message.starts_with("Invalid limit price for AAPL"));
        }
        assert!(h.executor.limit_orders.lock().unwrap().is_empty());
        assert_eq!(h.log.recent_trades(1).unwrap()[0].status, TradeStatus::Error);
    }

    #[tokio::test]
    async fn limit_order_logs_executor_failure() {
        let h = setup_gate(quote(100.0, 101.0), true);
        let outcome = h
            .gate
            .create_limit_order(OpenRequest::new("AAPL", 500.0, Direction::Buy), 95.0)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "market closed");
        assert_eq!(h.log.recent_trades(1).unwrap()[0].status, TradeStatus::Error);
    }

    fn losing_portfolio() -> PortfolioSnapshot {
        let mut losing = position(42, 1_000.0);
        losing.instrument_id = 2002;
        losing.net_profit = -300.0;
        PortfolioSnapshot {
            positions: vec![losing, position(1, 1_000.0)],
            total_invested: 2_000.0,
            total_pnl: 0.0,
            cash_available: 8_000.0,
        }
    }

    #[tokio::test]
    async fn close_looks_up_instrument_and_records_pnl() {
        let h = setup_gate_with(Some(losing_portfolio()), quote(100.0, 101.0), false);
        let outcome = h
            .gate
            .close_position(42, None, Some("stop hit".to_string()))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.position_id, Some(42));
        assert_eq!(outcome.message, "Closed position 42");
        assert_eq!(*h.executor.closes.lock().unwrap(), vec![(42, 2002)]);

        let closes = h.log.recent_closes(1).unwrap();
        assert_eq!(closes[0].instrument_id, Some(2002));
        assert_eq!(closes[0].pnl, Some(-300.0));
        assert_eq!(closes[0].reason.as_deref(), Some("stop hit"));
        assert_eq!(closes[0].mode, TradingMode::Demo);
    }

    #[tokio::test]
    async fn closed_loss_trips_daily_limit() {
        let h = setup_gate_with(Some(losing_portfolio()), quote(100.0, 101.0), false);
        assert!(h.gate.close_position(42, None, None).await.success);

        let outcome = h
            .gate
            .open_position(OpenRequest::new("AAPL", 500.0, Direction::Buy))
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("Daily loss 3.0% exceeds limit 3%"));
        assert!(h.executor.tickets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_unknown_position_needs_instrument() {
        let h = setup_gate(quote(100.0, 101.0), false);
        let outcome = h.gate.close_position(99, None, None).await;

        assert!(!outcome.success);
        assert!(outcome
            .message
            .starts_with("Could not find instrument_id for position 99"));
        assert!(h.executor.closes.lock().unwrap().is_empty());
        assert!(h.log.recent_closes(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_with_explicit_instrument_survives_portfolio_outage() {
        let h = setup_gate_with(None, quote(100.0, 101.0), false);
        let outcome = h.gate.close_position(7, Some(3003), None).await;

        assert!(outcome.success);
        assert_eq!(*h.executor.closes.lock().unwrap(), vec![(7, 3003)]);
        assert_eq!(h.log.recent_closes(1).unwrap()[0].pnl, None);
    }

    #[tokio::test]
    async fn close_failure_is_recorded() {
        let h = setup_gate_with(Some(losing_portfolio()), quote(100.0, 101.0), true);
        let outcome = h.gate.close_position(42, None, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "market closed");
        let closes = h.log.recent_closes(1).unwrap();
        assert_eq!(closes[0].pnl, None);
        assert_eq!(closes[0].reason.as_deref(), Some("FAILED: market closed"));
        assert_eq!(h.log.realized_pnl_today(TradingMode::Demo).await.unwrap(), 0.0);
    }
}
