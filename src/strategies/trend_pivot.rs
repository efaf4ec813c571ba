use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::positions::{calculate_pnl, Position, PositionMeta, PositionsStore};
use crate::strategies::Strategy;
use crate::trend::{ConfirmArgs, TrendService};
use crate::types::{Direction, OrderSide, Side, Trend};
use crate::utils::to_exchange_symbol_id;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Every evaluation is anchored on the 4h ledger direction.
const ANCHOR_TIMEFRAME: &str = "4h";
/// Signals without an explicit timeframe land on this channel.
const DEFAULT_TIMEFRAME: &str = "15m";
const SOURCE: &str = "trend-pivot";

/// Dual-timeframe trend-confirmation trading.
///
/// Every trend/pivot/strong-pivot signal is persisted into the
/// trend-confirmation ledger under a per-kind named identity, so each
/// (symbol, timeframe) carries at most three live rows and a newer signal
/// of the same kind replaces its own prior state. After each write the
/// position is re-evaluated: entry requires the 4h anchor and the signal
/// timeframe to agree on a non-neutral direction; a 4h flip against the
/// recorded entry direction exits in full; a main-timeframe-only flip
/// exits down a ladder sized by how many ledger rows confirm the reversal
/// (1 -> all, 2 -> half, 3+ -> a third of the remainder).
pub struct TrendPivotStrategy {
    store: Arc<PositionsStore>,
    trend: Arc<TrendService>,
}

impl TrendPivotStrategy {
    pub fn new(store: Arc<PositionsStore>, trend: Arc<TrendService>) -> Self {
        Self { store, trend }
    }

    async fn handle_signal(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        direction: Side,
        kind: &str,
    ) -> Result<(), BotError> {
        let timeframe = alert.timeframe_or(DEFAULT_TIMEFRAME).to_lowercase();
        logger::debug(
            LogTag::Strategy,
            &format!(
                "{}: {} {} signal for {} on {}",
                bot.name(),
                direction,
                kind,
                alert.symbol,
                timeframe
            ),
        );

        self.trend
            .confirm(
                ConfirmArgs::new(&alert.symbol, &timeframe, direction)
                    .with_source(SOURCE)
                    .with_name(&format!("{}:{}", kind, timeframe)),
            )
            .await?;

        if timeframe == ANCHOR_TIMEFRAME {
            // an anchor move can change the verdict on every traded channel
            let timeframes: Vec<String> = bot
                .cfg
                .timeframe_trend
                .iter()
                .map(|tf| tf.to_lowercase())
                .filter(|tf| tf != ANCHOR_TIMEFRAME)
                .collect();
            for tf in timeframes {
                self.evaluate(bot, alert, &tf).await?;
            }
        } else {
            self.evaluate(bot, alert, &timeframe).await?;
        }
        Ok(())
    }

    async fn evaluate(&self, bot: &BotEngine, alert: &Alert, timeframe: &str) -> Result<(), BotError> {
        let symbol = &alert.symbol;
        let main_dir = self.trend.current_trend(symbol, timeframe).await?;
        let anchor_dir = self.trend.current_trend(symbol, ANCHOR_TIMEFRAME).await?;

        match self.store.find_open(bot.name(), symbol).await? {
            None => self.try_enter(bot, alert, timeframe, main_dir, anchor_dir).await,
            Some(position) => {
                self.try_exit(bot, alert, timeframe, position, main_dir, anchor_dir)
                    .await
            }
        }
    }

    async fn try_enter(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        timeframe: &str,
        main_dir: Trend,
        anchor_dir: Trend,
    ) -> Result<(), BotError> {
        if anchor_dir.is_neutral() || main_dir != anchor_dir {
            return Ok(());
        }
        let side = match main_dir {
            Trend::Long => Side::Long,
            Trend::Short => Side::Short,
            Trend::Neutral => return Ok(()),
        };
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
            None => return Ok(()),
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
                    Some(&format!("{}-trend-{}", bot.name(), Uuid::new_v4().simple())),
                )
                .await?;
        }

        let mut position = self
            .store
            .open(bot.name(), &alert.symbol, alert.price, base_usd)
            .await?;
        position.meta = Some(PositionMeta::TrendPivot {
            original_direction: side,
            closed_confirmations: 0,
        });
        self.store.update_meta(&position).await?;

        bot.notify(&format!(
            "{}: TREND ENTRY {} {} on {} @{}\nSize: ${}\n4h anchor and {} agree on {}",
            bot.name(),
            side.to_string().to_uppercase(),
            alert.symbol,
            timeframe,
            alert.price,
            base_usd,
            timeframe,
            main_dir
        ))
        .await;
        Ok(())
    }

    async fn try_exit(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        timeframe: &str,
        position: Position,
        main_dir: Trend,
        anchor_dir: Trend,
    ) -> Result<(), BotError> {
        let (original, closed_confirmations) = match &position.meta {
            Some(PositionMeta::TrendPivot {
                original_direction,
                closed_confirmations,
            }) => (*original_direction, *closed_confirmations),
            // not this strategy's position
            _ => return Ok(()),
        };
        let original_trend = original.as_trend();

        // the anchor flipping against the entry direction overrides
        // everything: full exit
        if !anchor_dir.is_neutral() && anchor_dir != original_trend {
            return self
                .close_fully(
                    bot,
                    alert,
                    position,
                    &format!("4h anchor reversed to {}", anchor_dir),
                )
                .await;
        }

        // main-timeframe-only reversal while the anchor holds
        if main_dir.is_neutral() || main_dir == original_trend {
            return Ok(());
        }
        let reversal_side = match main_dir {
            Trend::Long => Side::Long,
            Trend::Short => Side::Short,
            Trend::Neutral => return Ok(()),
        };
        let confirmations = self
            .trend
            .live_count(&alert.symbol, timeframe, reversal_side)
            .await?;

        match confirmations {
            0 => Ok(()),
            1 => {
                self.close_fully(
                    bot,
                    alert,
                    position,
                    &format!("{} reversed on a single confirmation", timeframe),
                )
                .await
            }
            n => {
                let fraction = if n == 2 {
                    Decimal::new(5, 1)
                } else {
                    Decimal::new(33, 2)
                };
                self.close_partially(
                    bot,
                    alert,
                    position,
                    original,
                    fraction,
                    n,
                    closed_confirmations,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn close_partially(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        mut position: Position,
        original: Side,
        fraction: Decimal,
        confirmations: usize,
        closed_confirmations: u32,
    ) -> Result<(), BotError> {
        let close_usd = (position.amount_usd * fraction).round_dp(2);
        let tokens = if position.avg_entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (close_usd / position.avg_entry_price).round_dp(8)
        };
        bot.exchange
            .place_market(
                &to_exchange_symbol_id(&alert.symbol),
                OrderSide::Sell,
                &tokens.normalize().to_string(),
                Some(&format!("{}-trend-exit-{}", bot.name(), Uuid::new_v4().simple())),
            )
            .await?;

        let remaining = position.amount_usd - close_usd;
        self.store.reduce(&mut position, remaining).await?;
        position.meta = Some(PositionMeta::TrendPivot {
            original_direction: original,
            closed_confirmations: closed_confirmations + 1,
        });
        self.store.update_meta(&position).await?;

        bot.notify(&format!(
            "{}: TREND PARTIAL EXIT {} @{}\n{} confirmations against the position\nClosed: ${}\nRemaining: ${}",
            bot.name(),
            alert.symbol,
            alert.price,
            confirmations,
            close_usd,
            remaining.round_dp(2)
        ))
        .await;
        Ok(())
    }

    async fn close_fully(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        mut position: Position,
        reason: &str,
    ) -> Result<(), BotError> {
        let side = match &position.meta {
            Some(PositionMeta::TrendPivot {
                original_direction, ..
            }) => *original_direction,
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
        bot.notify(&format!(
            "{}: TREND EXIT {} @{}\nReason: {}\nPnL: ${} ({}%)",
            bot.name(),
            alert.symbol,
            alert.price,
            reason,
            pnl.pnl,
            pnl.pnl_percent
        ))
        .await;
        Ok(())
    }
}

#[async_trait]
impl Strategy for TrendPivotStrategy {
    fn name(&self) -> &'static str {
        "trend-pivot"
    }

    async fn on_long_trend(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Long, "trend").await
    }

    async fn on_short_trend(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Short, "trend").await
    }

    async fn on_long_pivot_point(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Long, "pivot").await
    }

    async fn on_short_pivot_point(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Short, "pivot").await
    }

    async fn on_strong_long_pivot_point(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Long, "strong-pivot").await
    }

    async fn on_strong_short_pivot_point(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        self.handle_signal(bot, alert, Side::Short, "strong-pivot").await
    }
}
