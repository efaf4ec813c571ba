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
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opens only on the 30m channel.
const OPEN_TIMEFRAME: &str = "30m";
/// Synchronization lockouts only listen on the 1h channel.
const SYNC_TIMEFRAME: &str = "1h";
/// A bullish-volume arm goes stale after this long.
const ARM_WINDOW_MINUTES: i64 = 30;
/// Synchronization signals lock entries out for this long.
const ENTRY_LOCK_MINUTES: i64 = 60;
/// Default fill ceiling for this family.
const DEFAULT_MAX_FILLS: u32 = 3;

#[derive(Debug, Clone)]
struct VolumeState {
    ready_to_close: bool,
    last_volume: f64,
    last_update: DateTime<Utc>,
}

/// "Bullish volume primes a close, decreasing volume pulls the trigger."
///
/// A bullish-volume signal arms the close; while armed (and fresh), each
/// volume reading is compared to the cached one; a strictly lower reading
/// closes the position, anything else ratchets the cache up. A separate
/// synchronization signal family locks new entries out for an hour.
pub struct SmartVolumeStrategy {
    store: Arc<PositionsStore>,
    states: RwLock<HashMap<(String, String), VolumeState>>,
    entry_locks: RwLock<HashMap<(String, String), DateTime<Utc>>>,
}

impl SmartVolumeStrategy {
    pub fn new(store: Arc<PositionsStore>) -> Self {
        Self {
            store,
            states: RwLock::new(HashMap::new()),
            entry_locks: RwLock::new(HashMap::new()),
        }
    }

    fn max_fills(bot: &BotEngine) -> u32 {
        bot.cfg.max_fills.unwrap_or(DEFAULT_MAX_FILLS)
    }

    async fn clear_state(&self, bot_name: &str, symbol: &str) {
        self.states
            .write()
            .await
            .remove(&(bot_name.to_string(), symbol.to_string()));
    }

    /// Remaining lockout, if one is active. Expired locks are evicted.
    async fn entry_lock_remaining(&self, bot_name: &str, symbol: &str) -> Option<Duration> {
        let key = (bot_name.to_string(), symbol.to_string());
        let mut locks = self.entry_locks.write().await;
        match locks.get(&key) {
            Some(until) => {
                let now = Utc::now();
                if now >= *until {
                    locks.remove(&key);
                    None
                } else {
                    Some(*until - now)
                }
            }
            None => None,
        }
    }

    async fn lock_entry(&self, bot: &BotEngine, alert: &Alert, reason: &str) {
        let until = Utc::now() + Duration::minutes(ENTRY_LOCK_MINUTES);
        self.entry_locks
            .write()
            .await
            .insert((bot.name().to_string(), alert.symbol.clone()), until);
        logger::info(
            LogTag::Strategy,
            &format!(
                "{}: entries for {} locked until {} ({})",
                bot.name(),
                alert.symbol,
                until.format("%H:%M:%S"),
                reason
            ),
        );
        bot.notify(&format!(
            "{}: {} for {} @{}\nEntries locked for 1 hour (until {})",
            bot.name(),
            reason,
            alert.symbol,
            alert.price,
            until.format("%H:%M UTC")
        ))
        .await;
    }

    async fn handle_synchronization(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        reason: &str,
    ) -> Result<(), BotError> {
        if alert.timeframe_or(SYNC_TIMEFRAME) != SYNC_TIMEFRAME {
            logger::debug(
                LogTag::Strategy,
                &format!(
                    "{}: {} on {} ignored, listening on {} only",
                    bot.name(),
                    reason,
                    alert.timeframe_or("?"),
                    SYNC_TIMEFRAME
                ),
            );
            return Ok(());
        }
        self.lock_entry(bot, alert, reason).await;
        Ok(())
    }

    async fn close_position(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        mut existing: Position,
        header: String,
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
            "{}\nFinal size: {}\nAvg entry: ${}\nClose price: ${}\nPnL: ${} ({}%)",
            header, pnl.total_size, pnl.avg_entry_price, pnl.current_price, pnl.pnl, pnl.pnl_percent
        ))
        .await;
        Ok(())
    }
}

#[async_trait]
impl Strategy for SmartVolumeStrategy {
    fn name(&self) -> &'static str {
        "smartvolume"
    }

    async fn on_smart_volume_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.on_open(bot, alert).await
    }

    async fn on_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if let Some(remaining) = self.entry_lock_remaining(bot.name(), &alert.symbol).await {
            let minutes = remaining.num_minutes();
            bot.notify(&format!(
                "{}: entry for {} locked, {}h {}m remaining",
                bot.name(),
                alert.symbol,
                minutes / 60,
                minutes % 60
            ))
            .await;
            return Ok(());
        }

        // wrong channel: drop silently, the 30m feed is the only entry feed
        if alert.timeframe_or(OPEN_TIMEFRAME) != OPEN_TIMEFRAME {
            logger::debug(
                LogTag::Strategy,
                &format!(
                    "{}: open on {} ignored, entries only on {}",
                    bot.name(),
                    alert.timeframe_or("?"),
                    OPEN_TIMEFRAME
                ),
            );
            return Ok(());
        }

        if let Some(existing) = self.store.find_open(bot.name(), &alert.symbol).await? {
            if existing.fills_count >= Self::max_fills(bot) {
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
        let pnl = calculate_pnl(&position, alert.price);
        bot.notify(&format!(
            "{}: SMART VOLUME OPEN {} @{} ${}\nSize: {}\nAvg entry: ${}\nCurrent: ${}\nPnL: ${} ({}%)",
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

        if existing.fills_count >= Self::max_fills(bot) {
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
            "{}: SMART VOLUME ADD {} @{} ${}\nNew size: {}\nNew avg entry: ${}\nCurrent: ${}\nPnL: ${} ({}%)",
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

    // plain close signals do nothing here: exits come from the
    // bullish-volume / volume-decrease pair
    async fn on_close(&self, _bot: &BotEngine, _alert: &Alert) -> Result<(), BotError> {
        Ok(())
    }

    async fn on_big_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        match existing {
            Some(p) => {
                let header = format!(
                    "{}: SMART VOLUME BIG CLOSE {} @{}",
                    bot.name(),
                    alert.symbol,
                    alert.price
                );
                self.close_position(bot, alert, p, header).await
            }
            None => {
                logger::info(
                    LogTag::Strategy,
                    &format!("{}: no position to close for {}", bot.name(), alert.symbol),
                );
                Ok(())
            }
        }
    }

    async fn on_bullish_volume(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        if self
            .store
            .find_open(bot.name(), &alert.symbol)
            .await?
            .is_none()
        {
            logger::debug(
                LogTag::Strategy,
                &format!(
                    "{}: bullish volume for {} ignored, nothing open",
                    bot.name(),
                    alert.symbol
                ),
            );
            return Ok(());
        }

        let key = (bot.name().to_string(), alert.symbol.clone());
        let mut states = self.states.write().await;
        let state = states.entry(key).or_insert(VolumeState {
            ready_to_close: false,
            last_volume: 0.0,
            last_update: Utc::now(),
        });
        state.ready_to_close = true;
        state.last_update = Utc::now();
        drop(states);

        bot.notify(&format!(
            "{}: bullish volume armed for {} - will close when volume decreases",
            bot.name(),
            alert.symbol
        ))
        .await;
        Ok(())
    }

    async fn on_volume_up(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let volume = match alert.volume {
            Some(v) => v,
            None => return Ok(()),
        };

        let existing = match self.store.find_open(bot.name(), &alert.symbol).await? {
            Some(p) => p,
            None => return Ok(()),
        };

        let key = (bot.name().to_string(), alert.symbol.clone());
        let previous = {
            let mut states = self.states.write().await;
            let state = match states.get_mut(&key) {
                Some(s) => s,
                None => return Ok(()),
            };

            let fresh = Utc::now() - state.last_update <= Duration::minutes(ARM_WINDOW_MINUTES);
            if !state.ready_to_close || !fresh {
                return Ok(());
            }

            let previous = state.last_volume;
            if !(previous > 0.0 && volume < previous) {
                // flat or rising volume only ratchets the cache up
                state.last_volume = volume;
                state.last_update = Utc::now();
                return Ok(());
            }
            previous
        };

        let header = format!(
            "{}: SMART VOLUME CLOSE {} @{}\nVolume decreased: {} -> {}",
            bot.name(),
            alert.symbol,
            alert.price,
            previous,
            volume
        );
        self.close_position(bot, alert, existing, header).await
    }

    async fn on_fixed_short_synchronization(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        self.handle_synchronization(bot, alert, "Fixed Short Synchronization")
            .await
    }

    async fn on_live_short_synchronization(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        self.handle_synchronization(bot, alert, "Live Short Synchronization")
            .await
    }
}
