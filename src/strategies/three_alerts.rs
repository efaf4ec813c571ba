use crate::alerts::{Alert, AlertKind};
use crate::bots::engine::BotEngine;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::positions::{calculate_pnl, PositionMeta, PositionsStore};
use crate::strategies::Strategy;
use crate::types::{Direction, OrderSide, Side};
use crate::utils::to_exchange_symbol_id;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct SignalMemory {
    active: HashSet<&'static str>,
}

/// Candle-pattern confluence trading.
///
/// Bull/bear RelSI, Marubozu and engulfing signals accumulate per-symbol
/// memory; a bullish signal with nothing open enters long, a bearish one
/// enters short (when the bot direction allows), and a signal from the
/// opposite family exits whatever is open and resets the symbol's memory.
pub struct ThreeAlertsStrategy {
    store: Arc<PositionsStore>,
    memory: RwLock<HashMap<String, SignalMemory>>,
}

impl ThreeAlertsStrategy {
    pub fn new(store: Arc<PositionsStore>) -> Self {
        Self {
            store,
            memory: RwLock::new(HashMap::new()),
        }
    }

    async fn remember(&self, symbol: &str, kind: AlertKind) {
        let mut memory = self.memory.write().await;
        let entry = memory.entry(symbol.to_string()).or_default();
        entry.active.insert(kind.name());
        logger::debug(
            LogTag::Strategy,
            &format!(
                "{}: {} pattern signal(s) active ({} latest)",
                symbol,
                entry.active.len(),
                kind.name()
            ),
        );
    }

    async fn forget(&self, symbol: &str) {
        self.memory.write().await.remove(symbol);
    }

    async fn handle(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        side: Side,
    ) -> Result<(), BotError> {
        self.remember(&alert.symbol, alert.kind).await;

        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        match existing {
            None => self.enter(bot, alert, side).await,
            Some(position) => {
                let position_side = match &position.meta {
                    Some(PositionMeta::ThreeAlerts { side }) => *side,
                    // not this strategy's position
                    _ => return Ok(()),
                };
                if position_side == side {
                    logger::debug(
                        LogTag::Strategy,
                        &format!(
                            "{}: {} signal confirms open {} position on {}",
                            bot.name(),
                            side,
                            position_side,
                            alert.symbol
                        ),
                    );
                    return Ok(());
                }
                self.exit(bot, alert, position).await
            }
        }
    }

    async fn enter(&self, bot: &BotEngine, alert: &Alert, side: Side) -> Result<(), BotError> {
        let allowed = match bot.cfg.direction {
            Direction::Both => true,
            dir => side.as_trend().matches(dir),
        };
        if !allowed {
            logger::debug(
                LogTag::Strategy,
                &format!(
                    "{}: {} entry on {} blocked by bot direction {}",
                    bot.name(),
                    side,
                    alert.symbol,
                    bot.cfg.direction
                ),
            );
            return Ok(());
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
                bot.notify(&format!("{}: sizing misconfigured, entry skipped", bot.name()))
                    .await;
                return Ok(());
            }
        };

        if side == Side::Long {
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
                    Some(&format!("{}-pattern-{}", bot.name(), Uuid::new_v4().simple())),
                )
                .await?;
        }

        let mut position = self
            .store
            .open(bot.name(), &alert.symbol, alert.price, base_usd)
            .await?;
        position.meta = Some(PositionMeta::ThreeAlerts { side });
        self.store.update_meta(&position).await?;

        bot.notify(&format!(
            "{}: PATTERN {} {} @{}\nSize: ${}\nTriggered by {}",
            bot.name(),
            side.to_string().to_uppercase(),
            alert.symbol,
            alert.price,
            base_usd,
            alert.kind.name()
        ))
        .await;
        Ok(())
    }

    async fn exit(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        mut position: crate::positions::Position,
    ) -> Result<(), BotError> {
        let side = match &position.meta {
            Some(PositionMeta::ThreeAlerts { side }) => *side,
            _ => Side::Long,
        };
        match bot.exchange.flash_close(&alert.symbol, Some(side), None).await {
            Ok(()) => {}
            Err(e) if e.is_position_already_closed() => {
                logger::info(
                    LogTag::Strategy,
                    &format!("{}: {} already flat on exchange", bot.name(), alert.symbol),
                );
            }
            Err(e) => {
                bot.notify(&format!(
                    "{}: failed to close {}: {}",
                    bot.name(),
                    alert.symbol,
                    e
                ))
                .await;
                return Err(e);
            }
        }
        let pnl = calculate_pnl(&position, alert.price);
        self.store.close(&mut position, alert.price).await?;
        self.forget(&alert.symbol).await;

        bot.notify(&format!(
            "{}: PATTERN EXIT {} {} @{}\nOpposite signal: {}\nPnL: ${} ({}%)",
            bot.name(),
            side.to_string().to_uppercase(),
            alert.symbol,
            alert.price,
            alert.kind.name(),
            pnl.pnl,
            pnl.pnl_percent
        ))
        .await;
        Ok(())
    }
}

#[async_trait]
impl Strategy for ThreeAlertsStrategy {
    fn name(&self) -> &'static str {
        "three-alerts"
    }

    async fn on_bull_relsi(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Long).await
    }

    async fn on_bear_relsi(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Short).await
    }

    async fn on_bull_marubozu(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Long).await
    }

    async fn on_bear_marubozu(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Short).await
    }

    async fn on_bull_engulfing(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Long).await
    }

    async fn on_bear_engulfing(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle(bot, alert, Side::Short).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{harness, TestHarness};

    fn strategy(h: &TestHarness) -> Box<dyn Strategy> {
        Box::new(ThreeAlertsStrategy::new(Arc::clone(&h.store)))
    }

    #[tokio::test]
    async fn bull_signal_enters_long() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |_| {});

        bot.process(&h.alert("BullMarubozu", "BTCUSDT", "50000"))
            .await
            .unwrap();
        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert!(matches!(
            p.meta,
            Some(PositionMeta::ThreeAlerts { side: Side::Long })
        ));
    }

    #[tokio::test]
    async fn bear_signal_blocked_for_long_only_bot() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |cfg| {
            cfg.direction = Direction::Long;
        });

        bot.process(&h.alert("BearEngulfing", "BTCUSDT", "50000"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bear_signal_enters_short_when_allowed() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |cfg| {
            cfg.direction = Direction::Both;
        });

        bot.process(&h.alert("BearRelsi", "ETHUSDT", "1800"))
            .await
            .unwrap();
        let p = h.store.find_open("TestBot", "ETHUSDT").await.unwrap().unwrap();
        assert!(matches!(
            p.meta,
            Some(PositionMeta::ThreeAlerts { side: Side::Short })
        ));
    }

    #[tokio::test]
    async fn opposite_family_signal_exits() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |cfg| {
            cfg.direction = Direction::Both;
        });

        bot.process(&h.alert("BullRelsi", "BTCUSDT", "50000"))
            .await
            .unwrap();
        // same-family confirmation holds the position
        bot.process(&h.alert("BullEngulfing", "BTCUSDT", "50500"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_some());

        bot.process(&h.alert("BearMarubozu", "BTCUSDT", "51000"))
            .await
            .unwrap();
        assert!(h.store.find_open("TestBot", "BTCUSDT").await.unwrap().is_none());
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("PATTERN EXIT")));
    }
}
