//! Shared test fixtures: in-memory stores, a call-recording exchange and a
//! message-collecting notifier wired into a disposable bot engine.

use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::config::{BotConfig, SizingConfig};
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::positions::{PositionLocks, PositionsStore};
use crate::strategies::Strategy;
use crate::telegram::Notifier;
use crate::trend::{ConfirmArgs, TrendService, TrendStore};
use crate::types::{Direction, OrderSide, Side};
use crate::volume::VolumeUpService;
use async_trait::async_trait;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Exchange gateway that records every call and never talks to a network.
#[derive(Default)]
pub struct MockExchange {
    calls: Mutex<Vec<String>>,
    flash_close_failure: Mutex<Option<(String, String)>>,
}

impl MockExchange {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every subsequent flash_close fail with this exchange error.
    pub fn fail_flash_close_with(&self, code: &str, message: &str) {
        *self.flash_close_failure.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    fn is_allowed(&self, _symbol_id: &str) -> bool {
        true
    }

    async fn ensure_leverage(&self, symbol_id: &str, leverage: u32) -> Result<(), BotError> {
        self.record(format!("ensure_leverage {} {}", symbol_id, leverage));
        Ok(())
    }

    async fn calc_size_from_usd(
        &self,
        symbol_id: &str,
        last_price: Decimal,
        usd_amount: Decimal,
    ) -> Result<String, BotError> {
        self.record(format!("calc_size {} {} {}", symbol_id, last_price, usd_amount));
        if last_price.is_zero() {
            return Ok("0".to_string());
        }
        Ok((usd_amount / last_price).round_dp(8).normalize().to_string())
    }

    async fn place_market(
        &self,
        symbol_id: &str,
        side: OrderSide,
        size: &str,
        _client_oid: Option<&str>,
    ) -> Result<(), BotError> {
        self.record(format!("place_market {} {} {}", side.as_str(), symbol_id, size));
        Ok(())
    }

    async fn flash_close(
        &self,
        symbol: &str,
        hold_side: Option<Side>,
        partial_size: Option<&str>,
    ) -> Result<(), BotError> {
        self.record(format!(
            "flash_close {} {} {}",
            symbol,
            hold_side.map(|s| s.to_string()).unwrap_or_default(),
            partial_size.unwrap_or("all")
        ));
        if let Some((code, message)) = self.flash_close_failure.lock().unwrap().clone() {
            return Err(BotError::exchange(Some(code), message));
        }
        Ok(())
    }
}

/// Notifier that collects messages instead of sending them.
#[derive(Default)]
pub struct MockNotifier {
    messages: Mutex<Vec<String>>,
}

impl MockNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// Strategy with only default (no-op) handlers.
pub struct NoopStrategy;

#[async_trait]
impl Strategy for NoopStrategy {
    fn name(&self) -> &'static str {
        "noop"
    }
}

pub struct TestHarness {
    pub store: Arc<PositionsStore>,
    pub volume: Arc<VolumeUpService>,
    pub trend: Arc<TrendService>,
    pub exchange: Arc<MockExchange>,
    pub notifier: Arc<MockNotifier>,
    pub locks: Arc<PositionLocks>,
}

impl TestHarness {
    /// A bot engine named "TestBot" over the harness collaborators.
    pub fn engine(
        &self,
        strategy: Box<dyn Strategy>,
        configure: impl FnOnce(&mut BotConfig),
    ) -> BotEngine {
        let mut cfg = base_config();
        configure(&mut cfg);
        BotEngine::new(
            cfg,
            Arc::clone(&self.exchange) as Arc<dyn ExchangeGateway>,
            Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            Arc::clone(&self.trend) as Arc<dyn crate::trend::TrendProvider>,
            strategy,
            Arc::clone(&self.locks),
        )
    }

    pub fn alert(&self, name: &str, symbol: &str, price: &str) -> Alert {
        Alert::from_payload(&json!({
            "alertName": name,
            "symbol": symbol,
            "price": price,
        }))
        .unwrap()
    }

    pub fn alert_tf(&self, name: &str, symbol: &str, price: &str, timeframe: &str) -> Alert {
        Alert::from_payload(&json!({
            "alertName": name,
            "symbol": symbol,
            "price": price,
            "timeframe": timeframe,
        }))
        .unwrap()
    }

    pub fn volume_alert(&self, symbol: &str, timeframe: &str, volume: f64) -> Alert {
        Alert::from_payload(&json!({
            "alertName": "VolumeUp",
            "symbol": symbol,
            "price": "1",
            "timeframe": timeframe,
            "volume": volume,
        }))
        .unwrap()
    }
}

pub fn base_config() -> BotConfig {
    BotConfig {
        name: "TestBot".to_string(),
        enabled: true,
        strategy: None,
        prod: false,
        is_trended: false,
        direction: Direction::Long,
        timeframe_trend: vec!["1h".to_string(), "1m".to_string()],
        symbol_filter: vec![],
        scheduled_notification: false,
        scheduled_time: None,
        exchange_profile: "BITGET".to_string(),
        telegram_channel: "bot1".to_string(),
        sizing: Some(SizingConfig {
            base_usd: Decimal::from_str("200").unwrap(),
            add_fraction: Decimal::from_str("0.5").unwrap(),
            leverage: 15,
        }),
        max_fills: Some(4),
        volume_close_gate: false,
    }
}

pub async fn harness() -> TestHarness {
    let positions_conn = Arc::new(tokio::sync::Mutex::new(
        Connection::open_in_memory().expect("in-memory sqlite"),
    ));
    let trend_conn = Arc::new(tokio::sync::Mutex::new(
        Connection::open_in_memory().expect("in-memory sqlite"),
    ));
    let store = Arc::new(PositionsStore::new(positions_conn));
    store.init().await.unwrap();
    let trend_store = Arc::new(TrendStore::new(trend_conn));
    trend_store.init().await.unwrap();

    TestHarness {
        store,
        volume: Arc::new(VolumeUpService::new()),
        trend: Arc::new(TrendService::new(trend_store)),
        exchange: Arc::new(MockExchange::default()),
        notifier: Arc::new(MockNotifier::default()),
        locks: Arc::new(PositionLocks::new()),
    }
}

pub async fn push_trend(h: &TestHarness, symbol: &str, timeframe: &str, side: Side) {
    h.trend
        .confirm(ConfirmArgs::new(symbol, timeframe, side))
        .await
        .unwrap();
}

/// Engine with a no-op strategy for engine-level tests.
pub async fn engine_with(configure: impl FnOnce(&mut BotConfig)) -> BotEngine {
    let h = harness().await;
    h.engine(Box::new(NoopStrategy), configure)
}
