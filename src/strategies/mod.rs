pub mod default;
pub mod domination;
pub mod partial_close;
pub mod smart_volume;
pub mod three_alerts;
pub mod trend_pivot;

pub use default::SmartVolDefaultStrategy;
pub use domination::{spawn_continuation_sweep, sweep_once, DominationStrategy};
pub use partial_close::PartialCloseStrategy;
pub use smart_volume::SmartVolumeStrategy;
pub use three_alerts::ThreeAlertsStrategy;
pub use trend_pivot::TrendPivotStrategy;

use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::errors::BotError;
use async_trait::async_trait;

/// Per-alert-kind lifecycle handlers.
///
/// Every handler defaults to a no-op so an implementation only spells out
/// the signal families it actually trades on; the engine dispatches each
/// classified alert to exactly one of these.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    // Smart-vol family
    async fn on_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_add(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_big_close(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_big_add(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_smart_volume_open(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bullish_volume(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_volume_up(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_fixed_short_synchronization(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_live_short_synchronization(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }

    // Trend-pivot family
    async fn on_long_trend(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_short_trend(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_long_pivot_point(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_short_pivot_point(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_strong_long_pivot_point(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_strong_short_pivot_point(
        &self,
        bot: &BotEngine,
        alert: &Alert,
    ) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }

    // Domination family
    async fn on_buyer_domination(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_seller_domination(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_buyer_continuation(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_seller_continuation(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }

    // Candle-pattern family
    async fn on_bull_relsi(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bear_relsi(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bull_marubozu(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bear_marubozu(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bull_engulfing(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
    async fn on_bear_engulfing(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        let _ = (bot, alert);
        Ok(())
    }
}
