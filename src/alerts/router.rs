use crate::alerts::types::{Alert, AlertFamily, AlertKind};
use crate::bots::BotsRegistry;
use crate::config::BotConfig;
use crate::errors::BotError;
use crate::logger::{self, LogTag};
use crate::volume::VolumeUpService;
use serde_json::Value;
use std::sync::Arc;

/// Classifies raw webhook payloads and fans them out to matching bots.
///
/// Validation failures are rejected here and never reach a strategy. A
/// bot failing mid-fan-out is logged and never aborts the loop for its
/// siblings.
pub struct AlertsRouter {
    registry: Arc<BotsRegistry>,
    volume: Arc<VolumeUpService>,
}

impl AlertsRouter {
    pub fn new(registry: Arc<BotsRegistry>, volume: Arc<VolumeUpService>) -> Self {
        Self { registry, volume }
    }

    /// Which bot population an alert family is dispatched to.
    fn family_accepts(cfg: &BotConfig, family: AlertFamily) -> bool {
        match family {
            // every bot sees the smart-vol feed; strategies that do not
            // trade it no-op the handlers
            AlertFamily::SmartVol => true,
            AlertFamily::TrendPivot => cfg.strategy_tag() == "trend-pivot",
            AlertFamily::Domination => cfg.strategy_tag() == "domination",
            AlertFamily::ThreeAlerts => cfg.strategy_tag() == "three-alerts",
        }
    }

    pub async fn handle(&self, payload: &Value) -> Result<Alert, BotError> {
        let alert = Alert::from_payload(payload)?;
        logger::info(
            LogTag::Alerts,
            &format!(
                "Received {} for {} @{}",
                alert.kind.name(),
                alert.symbol,
                alert.price
            ),
        );

        // volume readings are cached before any bot sees them, so close
        // gates observe the newest value even when no bot trades the alert
        if alert.kind == AlertKind::VolumeUp {
            if let (Some(volume), Some(timeframe)) = (alert.volume, alert.timeframe.as_deref()) {
                self.volume
                    .save_volume_up(&alert.symbol, timeframe, volume)
                    .await;
            }
        }

        let family = alert.kind.family();
        for bot in self.registry.all() {
            if !Self::family_accepts(&bot.cfg, family) {
                continue;
            }
            if !bot.cfg.symbol_allowed(&alert.symbol) {
                logger::debug(
                    LogTag::Alerts,
                    &format!(
                        "{} skips {} (filter: {})",
                        bot.name(),
                        alert.symbol,
                        bot.cfg.symbol_filter.join(",")
                    ),
                );
                continue;
            }
            if let Err(e) = bot.process(&alert).await {
                logger::warning(
                    LogTag::Alerts,
                    &format!("{} failed: {}", bot.name(), e),
                );
            }
        }

        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{DominationStrategy, SmartVolDefaultStrategy};
    use crate::testkit::harness;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_alert_touches_no_bot() {
        let h = harness().await;
        let mut registry = BotsRegistry::new();
        registry.insert(h.engine(
            Box::new(SmartVolDefaultStrategy::new(
                Arc::clone(&h.store),
                Arc::clone(&h.volume),
            )),
            |_| {},
        ));
        let router = AlertsRouter::new(Arc::new(registry), Arc::clone(&h.volume));

        let err = router
            .handle(&json!({
                "alertName": "FooBar",
                "symbol": "BTCUSDT",
                "price": "1"
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());
        assert!(h.notifier.messages().is_empty());
        assert!(h.exchange.calls().is_empty());
    }

    #[tokio::test]
    async fn symbol_filter_limits_fanout() {
        let h = harness().await;
        let mut registry = BotsRegistry::new();
        registry.insert(h.engine(
            Box::new(SmartVolDefaultStrategy::new(
                Arc::clone(&h.store),
                Arc::clone(&h.volume),
            )),
            |cfg| {
                cfg.symbol_filter = vec!["ETHUSDT".to_string()];
            },
        ));
        let router = AlertsRouter::new(Arc::new(registry), Arc::clone(&h.volume));

        router
            .handle(&json!({
                "alertName": "SmartOpen",
                "symbol": "BTCUSDT",
                "price": "50000"
            }))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());

        router
            .handle(&json!({
                "alertName": "SmartOpen",
                "symbol": "ETHUSDT",
                "price": "1800"
            }))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "ETHUSDT").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn domination_alerts_reach_only_domination_bots() {
        let h = harness().await;
        let mut registry = BotsRegistry::new();
        registry.insert(h.engine(
            Box::new(SmartVolDefaultStrategy::new(
                Arc::clone(&h.store),
                Arc::clone(&h.volume),
            )),
            |cfg| {
                cfg.name = "PlainBot".to_string();
            },
        ));
        registry.insert(h.engine(
            Box::new(DominationStrategy::new(Arc::clone(&h.store))),
            |cfg| {
                cfg.name = "DomBot".to_string();
                cfg.strategy = Some("domination".to_string());
            },
        ));
        let router = AlertsRouter::new(Arc::new(registry), Arc::clone(&h.volume));

        router
            .handle(&json!({
                "alertName": "BuyerDomination",
                "symbol": "BTCUSDT",
                "price": "50000"
            }))
            .await
            .unwrap();

        assert!(h.store.find_open("DomBot", "BTCUSDT").await.unwrap().is_some());
        assert!(h.store.find_open("PlainBot", "BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_failing_bot_does_not_abort_the_fanout() {
        let h = harness().await;
        // every flash close fails hard -> the close handler errors
        h.exchange.fail_flash_close_with("40001", "margin call");

        let mut registry = BotsRegistry::new();
        registry.insert(h.engine(
            Box::new(SmartVolDefaultStrategy::new(
                Arc::clone(&h.store),
                Arc::clone(&h.volume),
            )),
            |cfg| {
                cfg.name = "FailingBot".to_string();
            },
        ));
        registry.insert(h.engine(
            Box::new(SmartVolDefaultStrategy::new(
                Arc::clone(&h.store),
                Arc::clone(&h.volume),
            )),
            |cfg| {
                cfg.name = "HealthyBot".to_string();
            },
        ));
        // both bots have an open position; the close alert makes the first
        // bot's strategy throw, the second must still process it
        h.store
            .open(
                "FailingBot",
                "BTCUSDT",
                rust_decimal::Decimal::new(50000, 0),
                rust_decimal::Decimal::new(200, 0),
            )
            .await
            .unwrap();

        let router = AlertsRouter::new(Arc::new(registry), Arc::clone(&h.volume));
        // the handle call itself succeeds even though FailingBot errored
        router
            .handle(&json!({
                "alertName": "SmartClose",
                "symbol": "BTCUSDT",
                "price": "51000"
            }))
            .await
            .unwrap();

        // HealthyBot had nothing open and reported that instead of dying
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("HealthyBot") && m.contains("no open position")));
    }

    #[tokio::test]
    async fn volume_up_is_cached_then_fanned_out() {
        let h = harness().await;
        let registry = BotsRegistry::new();
        let router = AlertsRouter::new(Arc::new(registry), Arc::clone(&h.volume));

        router
            .handle(&json!({
                "alertName": "VolumeUp",
                "symbol": "ETHUSDT",
                "price": "1800",
                "timeframe": "5m",
                "volume": 25
            }))
            .await
            .unwrap();

        let cached = h.volume.get_volume_up("ETHUSDT", "5m").await.unwrap();
        assert_eq!(cached.volume, 25.0);
    }
}
