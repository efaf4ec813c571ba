use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::positions::{calculate_pnl, Position, PositionsStore};
use crate::strategies::Strategy;
use crate::types::{OrderSide, Side};
use crate::utils::to_exchange_symbol_id;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opens only on the 1h channel.
const OPEN_TIMEFRAME: &str = "1h";
/// A close on this channel always exits in full.
const FULL_CLOSE_TIMEFRAME: &str = "4h";

#[derive(Debug, Clone)]
struct LadderState {
    close_count: u32,
}

/// Ladders out of a position across successive 1h close signals:
/// the first arms, the second market-sells half the notional, the third
/// flash-closes the remainder. A 4h close signal always exits in full.
/// Ladder counters are in-memory and reset on restart.
pub struct PartialCloseStrategy {
    store: Arc<PositionsStore>,
    states: RwLock<HashMap<(String, String), LadderState>>,
}

impl PartialCloseStrategy {
    pub fn new(store: Arc<PositionsStore>) -> Self {
        Self {
            store,
            states: RwLock::new(HashMap::new()),
        }
    }

    async fn ladder_count(&self, bot_name: &str, symbol: &str) -> u32 {
        self.states
            .read()
            .await
            .get(&(bot_name.to_string(), symbol.to_string()))
            .map(|s| s.close_count)
            .unwrap_or(0)
    }

    async fn set_ladder_count(&self, bot_name: &str, symbol: &str, count: u32) {
        self.states.write().await.insert(
            (bot_name.to_string(), symbol.to_string()),
            LadderState { close_count: count },
        );
    }

    async fn clear_state(&self, bot_name: &str, symbol: &str) {
        self.states
            .write()
            .await
            .remove(&(bot_name.to_string(), symbol.to_string()));
    }

    async fn close_fully(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        mut existing: Position,
        label: &str,
    ) -> Result<(), BotError> {
        match bot.exchange.flash_close(&alert.symbol, Some(Side::Long), None).await {
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
        let pnl = calculate_pnl(&existing, alert.price);
        self.store.close(&mut existing, alert.price).await?;
        self.clear_state(bot.name(), &alert.symbol).await;
        bot.notify(&format!(
            "{}: {} {} @{}\nFinal size: {}\nAvg entry: ${}\nClose price: ${}\nPnL: ${} ({}%)",
            bot.name(),
            label,
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
}

#[async_trait]
impl Strategy for PartialCloseStrategy {
    fn name(&self) -> &'static str {
        "partial-close"
    }

    async fn on_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let timeframe = alert.timeframe_or(OPEN_TIMEFRAME);
        if timeframe != OPEN_TIMEFRAME {
            bot.notify(&format!(
                "{}: open on {} skipped - positions only open on the {} channel",
                bot.name(),
                timeframe,
                OPEN_TIMEFRAME
            ))
            .await;
            return Ok(());
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
        // fresh position, fresh ladder
        self.set_ladder_count(bot.name(), &alert.symbol, 0).await;

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
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        let mut existing = match existing {
            Some(p) => p,
            None => {
                logger::info(
                    LogTag::Strategy,
                    &format!("{}: no position for add on {}", bot.name(), alert.symbol),
                );
                return Ok(());
            }
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
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        let mut existing = match existing {
            Some(p) => p,
            None => {
                logger::info(
                    LogTag::Strategy,
                    &format!("{}: no position to close for {}", bot.name(), alert.symbol),
                );
                return Ok(());
            }
        };

        let timeframe = alert.timeframe_or(OPEN_TIMEFRAME);
        if timeframe == FULL_CLOSE_TIMEFRAME {
            return self.close_fully(bot, alert, existing, "CLOSE 4h").await;
        }

        let count = self.ladder_count(bot.name(), &alert.symbol).await;
        match count {
            0 => {
                // first signal only arms the ladder
                self.set_ladder_count(bot.name(), &alert.symbol, 1).await;
                bot.notify(&format!(
                    "{}: first close signal for {} - waiting for the second to sell half",
                    bot.name(),
                    alert.symbol
                ))
                .await;
                Ok(())
            }
            1 => {
                let close_usd = existing.amount_usd * Decimal::new(5, 1);
                let tokens = if existing.avg_entry_price.is_zero() {
                    Decimal::ZERO
                } else {
                    (close_usd / existing.avg_entry_price).round_dp(8)
                };
                bot.exchange
                    .place_market(
                        &to_exchange_symbol_id(&alert.symbol),
                        OrderSide::Sell,
                        &tokens.normalize().to_string(),
                        Some(&format!(
                            "{}-partial-close-{}",
                            bot.name(),
                            Uuid::new_v4().simple()
                        )),
                    )
                    .await?;
                let remaining = existing.amount_usd - close_usd;
                self.store.reduce(&mut existing, remaining).await?;
                self.set_ladder_count(bot.name(), &alert.symbol, 2).await;
                bot.notify(&format!(
                    "{}: partial close 50% of {} @{}\nClosed: ${}\nRemaining: ${}",
                    bot.name(),
                    alert.symbol,
                    alert.price,
                    close_usd.round_dp(2),
                    remaining.round_dp(2)
                ))
                .await;
                Ok(())
            }
            _ => {
                self.close_fully(bot, alert, existing, "FINAL CLOSE")
                    .await
            }
        }
    }

    async fn on_big_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        match existing {
            Some(p) => self.close_fully(bot, alert, p, "BIG CLOSE").await,
            None => {
                logger::info(
                    LogTag::Strategy,
                    &format!("{}: no position to close for {}", bot.name(), alert.symbol),
                );
                Ok(())
            }
        }
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

    async fn on_volume_up(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if let Some(volume) = alert.volume {
            if volume > 1_000_000.0 {
                bot.notify(&format!(
                    "{}: high volume on {} ({}): {}",
                    bot.name(),
                    alert.symbol,
                    alert.timeframe_or("?"),
                    volume
                ))
                .await;
            }
        }
        Ok(())
    }
}
