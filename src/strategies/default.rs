use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::trend::TrendProvider;
use crate::logger::{self, LogTag};
use crate::positions::{calculate_pnl, PositionsStore};
use crate::strategies::Strategy;
use crate::types::{OrderSide, Side};
use crate::utils::to_exchange_symbol_id;
use crate::volume::service::CLOSE_VOLUME_THRESHOLD;
use crate::volume::VolumeUpService;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Trend-gated open / add / close with a fill-count cap.
///
/// Bots with `volume_close_gate` route close signals through the volume-up
/// service: the first close arms a wait state, later closes only fire once
/// the cached volume clears the threshold inside its freshness window.
pub struct SmartVolDefaultStrategy {
    store: Arc<PositionsStore>,
    volume: Arc<VolumeUpService>,
}

impl SmartVolDefaultStrategy {
    pub fn new(store: Arc<PositionsStore>, volume: Arc<VolumeUpService>) -> Self {
        Self { store, volume }
    }

    async fn close_fully(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        let mut existing = match existing {
            Some(p) => p,
            None => {
                logger::warning(
                    LogTag::Strategy,
                    &format!("{}: no open position for {}", bot.name(), alert.symbol),
                );
                bot.notify(&format!(
                    "{}: no open position found for {}, skipping close",
                    bot.name(),
                    alert.symbol
                ))
                .await;
                return Ok(());
            }
        };

        match bot.exchange.flash_close(&alert.symbol, Some(Side::Long), None).await {
            Ok(()) => {
                let pnl = calculate_pnl(&existing, alert.price);
                self.store.close(&mut existing, alert.price).await?;
                self.volume
                    .mark_position_closed(&alert.symbol, bot.name())
                    .await;
                bot.notify(&format!(
                    "{}: CLOSE {} @{}\nSize: {}\nAvg entry: ${}\nClose price: ${}\nPnL: ${} ({}%)",
                    bot.name(),
                    alert.symbol,
                    alert.price,
                    pnl.total_size,
                    pnl.avg_entry_price,
                    pnl.current_price,
                    pnl.pnl,
                    pnl.pnl_percent
                ))
                .await;
                Ok(())
            }
            Err(e) if e.is_position_already_closed() => {
                // flat on the exchange already; reconcile our row
                self.store.close(&mut existing, alert.price).await?;
                self.volume
                    .mark_position_closed(&alert.symbol, bot.name())
                    .await;
                bot.notify(&format!(
                    "{}: {} was already closed on the exchange, record updated",
                    bot.name(),
                    alert.symbol
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                bot.notify(&format!(
                    "{}: failed to close {}: {}",
                    bot.name(),
                    alert.symbol,
                    e
                ))
                .await;
                Err(e)
            }
        }
    }

    /// First close arms the wait state; later closes pass only once the
    /// cached reading clears the threshold. Returns true when the close
    /// may proceed.
    async fn volume_gate_allows_close(&self, bot: &BotEngine, alert: &Alert) -> bool {
        if let Some(state) = self.volume.get_close_state(&alert.symbol, bot.name()).await {
            if self
                .volume
                .can_close_position(&alert.symbol, bot.name())
                .await
            {
                return true;
            }
            bot.notify(&format!(
                "{}: still waiting to close {} - volume {} below {}",
                bot.name(),
                alert.symbol,
                state.current_volume,
                CLOSE_VOLUME_THRESHOLD
            ))
            .await;
            return false;
        }

        // seed the wait state from the freshest cached reading
        let reading = match &alert.timeframe {
            Some(tf) => self.volume.get_volume_up(&alert.symbol, tf).await,
            None => self
                .volume
                .get_volume_up_by_symbol(&alert.symbol)
                .await
                .into_iter()
                .next(),
        };
        let initial = reading.map(|r| r.volume).unwrap_or(0.0);
        self.volume
            .init_close_state(&alert.symbol, bot.name(), initial)
            .await;
        bot.notify(&format!(
            "{}: close armed for {} at volume {}, waiting for volume >= {}",
            bot.name(),
            alert.symbol,
            initial,
            CLOSE_VOLUME_THRESHOLD
        ))
        .await;
        false
    }
}

#[async_trait]
impl Strategy for SmartVolDefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn on_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if bot.must_check_trend() {
            // opens gate on the first configured timeframe only
            let gate_timeframe = &bot.cfg.timeframe_trend[0];
            let trend = bot.trend.current(&alert.symbol, gate_timeframe).await?;
            if !trend.matches(bot.cfg.direction) {
                logger::info(
                    LogTag::Strategy,
                    &format!(
                        "{}: trend {} on {} does not match {}, skipping open",
                        bot.name(),
                        trend,
                        gate_timeframe,
                        bot.cfg.direction
                    ),
                );
                bot.notify(&format!(
                    "{}: trend {} does not match bot direction {} ({}), skipping open of {}",
                    bot.name(),
                    trend,
                    bot.cfg.direction,
                    gate_timeframe,
                    alert.symbol
                ))
                .await;
                return Ok(());
            }
        }

        if let Some(existing) = self.store.find_open(bot.name(), &alert.symbol).await? {
            if existing.fills_count >= bot.cfg.max_fills() {
                bot.notify(&format!(
                    "{}: max fills reached for {}",
                    bot.name(),
                    alert.symbol
                ))
                .await;
                return Ok(());
            }
            // already open, an open signal becomes an add
            return self.on_add(bot, alert).await;
        }

        let symbol_id = to_exchange_symbol_id(&alert.symbol);
        if !bot.exchange.is_allowed(&symbol_id) {
            bot.notify(&format!("{}: {} not allowed", bot.name(), symbol_id))
                .await;
            return Ok(());
        }

        let base_usd = match bot.base_usd() {
            Some(v) => v,
            None => {
                bot.notify(&format!("{}: sizing misconfigured, open skipped", bot.name()))
                    .await;
                return Ok(());
            }
        };
        if let Some(leverage) = bot.leverage() {
            bot.exchange.ensure_leverage(&symbol_id, leverage).await?;
        }

        let size = bot
            .exchange
            .calc_size_from_usd(&symbol_id, alert.price, base_usd)
            .await?;
        bot.exchange
            .place_market(
                &symbol_id,
                OrderSide::Buy,
                &size,
                Some(&format!("{}-open-{}", bot.name(), Uuid::new_v4().simple())),
            )
            .await?;

        let position = self
            .store
            .open(bot.name(), &alert.symbol, alert.price, base_usd)
            .await?;
        let pnl = calculate_pnl(&position, alert.price);
        bot.notify(&format!(
            "{}: OPEN {} @{} ${}\nSize: {}\nAvg entry: ${}\nCurrent: ${}\nPnL: ${} ({}%)",
            bot.name(),
            alert.symbol,
            alert.price,
            base_usd,
            pnl.total_size,
            pnl.avg_entry_price,
            pnl.current_price,
            pnl.pnl,
            pnl.pnl_percent
        ))
        .await;
        Ok(())
    }

    async fn on_add(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if bot.must_check_trend() {
            // adds take new risk: every timeframe must agree, neutral included
            if !bot.can_add_position(&alert.symbol).await? {
                bot.notify(&format!(
                    "{}: add for {} rejected - trends disagree across {}",
                    bot.name(),
                    alert.symbol,
                    bot.cfg.timeframe_trend.join(",")
                ))
                .await;
                return Ok(());
            }
        }

        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        let mut existing = match existing {
            Some(p) => p,
            // add with nothing open falls back to an open
            None => return self.on_open(bot, alert).await,
        };

        if existing.fills_count >= bot.cfg.max_fills() {
            bot.notify(&format!(
                "{}: max fills reached for {}",
                bot.name(),
                alert.symbol
            ))
            .await;
            return Ok(());
        }

        let add_usd = match bot.add_usd() {
            Some(v) => v,
            None => {
                bot.notify(&format!("{}: sizing misconfigured, add skipped", bot.name()))
                    .await;
                return Ok(());
            }
        };

        let symbol_id = to_exchange_symbol_id(&alert.symbol);
        let size = bot
            .exchange
            .calc_size_from_usd(&symbol_id, alert.price, add_usd)
            .await?;
        bot.exchange
            .place_market(
                &symbol_id,
                OrderSide::Buy,
                &size,
                Some(&format!("{}-add-{}", bot.name(), Uuid::new_v4().simple())),
            )
            .await?;
        self.store.add(&mut existing, alert.price, add_usd).await?;

        let pnl = calculate_pnl(&existing, alert.price);
        bot.notify(&format!(
            "{}: ADD {} @{} ${}\nNew size: {}\nNew avg entry: ${}\nCurrent: ${}\nPnL: ${} ({}%)",
            bot.name(),
            alert.symbol,
            alert.price,
            add_usd,
            pnl.total_size,
            pnl.avg_entry_price,
            pnl.current_price,
            pnl.pnl,
            pnl.pnl_percent
        ))
        .await;
        Ok(())
    }

    async fn on_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if bot.must_check_trend() {
            let should_close = bot.should_close_position(&alert.symbol).await?;
            if should_close {
                let main = bot.main_timeframe().unwrap_or_default();
                bot.notify(&format!(
                    "{}: main trend ({}) reversed, closing {}",
                    bot.name(),
                    main,
                    alert.symbol
                ))
                .await;
            }
            // the close signal itself still closes even when the main
            // trend has not flipped
        }

        if bot.cfg.volume_close_gate && !self.volume_gate_allows_close(bot, alert).await {
            return Ok(());
        }

        self.close_fully(bot, alert).await
    }

    async fn on_big_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        // emergency close bypasses the volume gate
        self.close_fully(bot, alert).await
    }

    async fn on_big_add(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        bot.notify(&format!(
            "{}: BIG ADD signal for {} @{}",
            bot.name(),
            alert.symbol,
            alert.price
        ))
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{harness, push_trend, TestHarness};
    use crate::types::Direction;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn strategy(h: &TestHarness) -> Box<dyn Strategy> {
        Box::new(SmartVolDefaultStrategy::new(
            Arc::clone(&h.store),
            Arc::clone(&h.volume),
        ))
    }

    #[tokio::test]
    async fn opens_when_trend_agrees() {
        let h = harness().await;
        push_trend(&h, "BTCUSDT", "1h", Side::Long).await;
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = true;
            cfg.direction = Direction::Long;
            cfg.timeframe_trend = vec!["1h".to_string(), "1m".to_string()];
        });

        bot.process(&h.alert("SmartOpen", "BTCUSDT", "50000"))
            .await
            .unwrap();

        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.avg_entry_price, d("50000"));
        assert_eq!(p.fills_count, 1);
        assert!(h
            .exchange
            .calls()
            .iter()
            .any(|c| c.starts_with("place_market buy")));
    }

    #[tokio::test]
    async fn open_skipped_when_trend_disagrees() {
        let h = harness().await;
        push_trend(&h, "BTCUSDT", "1h", Side::Short).await;
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = true;
            cfg.direction = Direction::Long;
            cfg.timeframe_trend = vec!["1h".to_string()];
        });

        bot.process(&h.alert("SmartOpen", "BTCUSDT", "50000"))
            .await
            .unwrap();

        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());
        assert!(h.exchange.calls().is_empty());
        assert!(h.notifier.messages().iter().any(|m| m.contains("skipping open")));
    }

    #[tokio::test]
    async fn add_computes_weighted_average_per_config() {
        // direction=long, tf=['1h','1m'], baseUsd=200, addFraction=0.5
        let h = harness().await;
        push_trend(&h, "BTCUSDT", "1h", Side::Long).await;
        push_trend(&h, "BTCUSDT", "1m", Side::Long).await;
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = true;
            cfg.direction = Direction::Long;
            cfg.timeframe_trend = vec!["1h".to_string(), "1m".to_string()];
        });

        bot.process(&h.alert("SmartOpen", "BTCUSDT", "50000"))
            .await
            .unwrap();
        bot.process(&h.alert("SmartVolAdd", "BTCUSDT", "51000"))
            .await
            .unwrap();

        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.fills_count, 2);
        assert_eq!(p.amount_usd, d("300"));
        // (200*50000 + 100*51000) / 300 = 50333.33...
        assert!((p.avg_entry_price - d("50333.333333333333")).abs() < d("0.001"));
    }

    #[tokio::test]
    async fn add_rejected_when_any_timeframe_disagrees() {
        let h = harness().await;
        push_trend(&h, "BTCUSDT", "1h", Side::Long).await;
        // 1m stays neutral -> strict-all add gate fails
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = true;
            cfg.direction = Direction::Long;
            cfg.timeframe_trend = vec!["1h".to_string(), "1m".to_string()];
        });

        h.store
            .open("TestBot", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        bot.process(&h.alert("SmartVolAdd", "BTCUSDT", "51000"))
            .await
            .unwrap();

        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.fills_count, 1);
        assert!(h.notifier.messages().iter().any(|m| m.contains("rejected")));
    }

    #[tokio::test]
    async fn max_fills_caps_adds() {
        let h = harness().await;
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.max_fills = Some(1);
        });

        h.store
            .open("TestBot", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        bot.process(&h.alert("SmartVolAdd", "BTCUSDT", "51000"))
            .await
            .unwrap();

        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.fills_count, 1);
        assert!(h.notifier.messages().iter().any(|m| m.contains("max fills")));
    }

    #[tokio::test]
    async fn close_treats_exchange_flat_as_success() {
        let h = harness().await;
        h.exchange.fail_flash_close_with("22002", "no position to close");
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = false;
        });

        h.store
            .open("TestBot", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        bot.process(&h.alert("SmartClose", "BTCUSDT", "52000"))
            .await
            .unwrap();

        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("already closed")));
    }

    #[tokio::test]
    async fn close_propagates_other_exchange_errors() {
        let h = harness().await;
        h.exchange.fail_flash_close_with("40001", "insufficient margin");
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = false;
        });

        h.store
            .open("TestBot", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        let err = bot
            .process(&h.alert("SmartClose", "BTCUSDT", "52000"))
            .await
            .unwrap_err();
        assert!(!err.is_position_already_closed());
        // the row stays open for the next signal to self-correct
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn volume_gate_arms_then_closes_at_threshold() {
        let h = harness().await;
        let strategy = strategy(&h);
        let bot = h.engine(strategy, |cfg| {
            cfg.is_trended = false;
            cfg.volume_close_gate = true;
        });

        h.store
            .open("TestBot", "ETHUSDT", d("1800"), d("200"))
            .await
            .unwrap();
        h.volume.save_volume_up("ETHUSDT", "5m", 10.0).await;

        // first close arms the gate and does not touch the exchange
        bot.process(&h.alert_tf("SmartClose", "ETHUSDT", "1850", "5m"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "ETHUSDT").await.unwrap().is_some());
        assert!(h.exchange.calls().is_empty());
        assert!(h.notifier.messages().iter().any(|m| m.contains("close armed")));

        // below the threshold: still waiting
        bot.process(&h.alert_tf("SmartClose", "ETHUSDT", "1850", "5m"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "ETHUSDT").await.unwrap().is_some());
        assert!(h.notifier.messages().iter().any(|m| m.contains("still waiting")));

        // a fresh reading clears the threshold; the next close fires
        h.volume.save_volume_up("ETHUSDT", "5m", 25.0).await;
        bot.process(&h.alert_tf("SmartClose", "ETHUSDT", "1850", "5m"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "ETHUSDT").await.unwrap().is_none());
        assert!(h
            .exchange
            .calls()
            .iter()
            .any(|c| c.starts_with("flash_close")));
    }
}
