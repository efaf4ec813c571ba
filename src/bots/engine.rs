use crate::alerts::{Alert, AlertKind};
use crate::config::BotConfig;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::positions::PositionLocks;
use crate::strategies::Strategy;
use crate::telegram::Notifier;
use crate::trend::TrendProvider;
use crate::types::Trend;
use crate::utils::main_timeframe;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;

/// One configured trading identity: static config plus the collaborators
/// its strategy works through.
pub struct BotEngine {
    pub cfg: BotConfig,
    pub exchange: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    pub trend: Arc<dyn TrendProvider>,
    strategy: Box<dyn Strategy>,
    locks: Arc<PositionLocks>,
}

impl BotEngine {
    pub fn new(
        cfg: BotConfig,
        exchange: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        trend: Arc<dyn TrendProvider>,
        strategy: Box<dyn Strategy>,
        locks: Arc<PositionLocks>,
    ) -> Self {
        Self {
            cfg,
            exchange,
            notifier,
            trend,
            strategy,
            locks,
        }
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn notify(&self, text: &str) {
        self.notifier.send(text).await;
    }

    /// Base notional from config. A missing or non-positive value degrades
    /// the bot to a logged no-op instead of an error.
    pub fn base_usd(&self) -> Option<Decimal> {
        match &self.cfg.sizing {
            Some(sizing) if sizing.base_usd > Decimal::ZERO => Some(sizing.base_usd),
            _ => {
                logger::error(
                    LogTag::Bots,
                    &format!("{}: base_usd missing or not positive", self.cfg.name),
                );
                None
            }
        }
    }

    /// Add notional: round(base_usd x add_fraction), half away from zero.
    pub fn add_usd(&self) -> Option<Decimal> {
        let base = self.base_usd()?;
        match &self.cfg.sizing {
            Some(sizing) if sizing.add_fraction > Decimal::ZERO => Some(
                (base * sizing.add_fraction)
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            ),
            _ => {
                logger::error(
                    LogTag::Bots,
                    &format!("{}: add_fraction missing or not positive", self.cfg.name),
                );
                None
            }
        }
    }

    pub fn leverage(&self) -> Option<u32> {
        self.cfg.sizing.as_ref().map(|s| s.leverage)
    }

    pub fn must_check_trend(&self) -> bool {
        self.cfg.is_trended && !self.cfg.timeframe_trend.is_empty()
    }

    pub async fn trend_agrees(&self, symbol: &str) -> Result<Trend, BotError> {
        self.trend.agree_all(symbol, &self.cfg.timeframe_trend).await
    }

    pub async fn trend_agrees_with_hierarchy(&self, symbol: &str) -> Result<Trend, BotError> {
        self.trend
            .agree_all_with_hierarchy(symbol, &self.cfg.timeframe_trend)
            .await
    }

    /// Add gate: all configured timeframes must match the bot direction.
    pub async fn can_add_position(&self, symbol: &str) -> Result<bool, BotError> {
        self.trend
            .can_add_position(symbol, &self.cfg.timeframe_trend, self.cfg.direction)
            .await
    }

    /// Close gate: the main timeframe reversed against the bot direction.
    pub async fn should_close_position(&self, symbol: &str) -> Result<bool, BotError> {
        self.trend
            .should_close_position(symbol, &self.cfg.timeframe_trend, self.cfg.direction)
            .await
    }

    /// Highest-priority configured timeframe (largest minute equivalent).
    pub fn main_timeframe(&self) -> Option<String> {
        main_timeframe(&self.cfg.timeframe_trend)
    }

    /// Dispatch one classified alert to the strategy, holding the
    /// per-(bot, symbol) lock for the whole call.
    pub async fn process(&self, alert: &Alert) -> Result<(), BotError> {
        logger::info(
            LogTag::Bots,
            &format!(
                "{} handling {} for {} @{}",
                self.name(),
                alert.kind.name(),
                alert.symbol,
                alert.price
            ),
        );

        let _guard = self.locks.acquire(self.name(), &alert.symbol).await;

        match alert.kind {
            AlertKind::SmartOpen => self.strategy.on_open(self, alert).await,
            AlertKind::SmartVolAdd => self.strategy.on_add(self, alert).await,
            AlertKind::SmartClose => self.strategy.on_close(self, alert).await,
            AlertKind::SmartBigClose => self.strategy.on_big_close(self, alert).await,
            AlertKind::SmartBigAdd => self.strategy.on_big_add(self, alert).await,
            AlertKind::SmartVolumeOpen => self.strategy.on_smart_volume_open(self, alert).await,
            AlertKind::BullishVolume => self.strategy.on_bullish_volume(self, alert).await,
            AlertKind::VolumeUp => self.strategy.on_volume_up(self, alert).await,
            AlertKind::FixedShortSynchronization => {
                self.strategy.on_fixed_short_synchronization(self, alert).await
            }
            AlertKind::LiveShortSynchronization => {
                self.strategy.on_live_short_synchronization(self, alert).await
            }
            AlertKind::LongTrend => self.strategy.on_long_trend(self, alert).await,
            AlertKind::ShortTrend => self.strategy.on_short_trend(self, alert).await,
            AlertKind::LongPivotPoint => self.strategy.on_long_pivot_point(self, alert).await,
            AlertKind::ShortPivotPoint => self.strategy.on_short_pivot_point(self, alert).await,
            AlertKind::StrongLongPivotPoint => {
                self.strategy.on_strong_long_pivot_point(self, alert).await
            }
            AlertKind::StrongShortPivotPoint => {
                self.strategy.on_strong_short_pivot_point(self, alert).await
            }
            AlertKind::BuyerDomination => self.strategy.on_buyer_domination(self, alert).await,
            AlertKind::SellerDomination => self.strategy.on_seller_domination(self, alert).await,
            AlertKind::BuyerContinuation => self.strategy.on_buyer_continuation(self, alert).await,
            AlertKind::SellerContinuation => {
                self.strategy.on_seller_continuation(self, alert).await
            }
            AlertKind::BullRelsi => self.strategy.on_bull_relsi(self, alert).await,
            AlertKind::BearRelsi => self.strategy.on_bear_relsi(self, alert).await,
            AlertKind::BullMarubozu => self.strategy.on_bull_marubozu(self, alert).await,
            AlertKind::BearMarubozu => self.strategy.on_bear_marubozu(self, alert).await,
            AlertKind::BullEngulfing => self.strategy.on_bull_engulfing(self, alert).await,
            AlertKind::BearEngulfing => self.strategy.on_bear_engulfing(self, alert).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::engine_with;
    use crate::config::SizingConfig;
    use std::str::FromStr;

    #[tokio::test]
    async fn sizing_derivation() {
        let engine = engine_with(|cfg| {
            cfg.sizing = Some(SizingConfig {
                base_usd: Decimal::from_str("200").unwrap(),
                add_fraction: Decimal::from_str("0.5").unwrap(),
                leverage: 15,
            });
        })
        .await;
        assert_eq!(engine.base_usd(), Some(Decimal::from_str("200").unwrap()));
        assert_eq!(engine.add_usd(), Some(Decimal::from_str("100").unwrap()));
        assert_eq!(engine.leverage(), Some(15));
    }

    #[tokio::test]
    async fn add_usd_rounds_to_whole_dollars() {
        let engine = engine_with(|cfg| {
            cfg.sizing = Some(SizingConfig {
                base_usd: Decimal::from_str("250").unwrap(),
                add_fraction: Decimal::from_str("0.3").unwrap(),
                leverage: 10,
            });
        })
        .await;
        // 250 * 0.3 = 75 exactly; 205 * 0.33 = 67.65 -> 68
        assert_eq!(engine.add_usd(), Some(Decimal::from_str("75").unwrap()));

        let engine = engine_with(|cfg| {
            cfg.sizing = Some(SizingConfig {
                base_usd: Decimal::from_str("205").unwrap(),
                add_fraction: Decimal::from_str("0.33").unwrap(),
                leverage: 10,
            });
        })
        .await;
        assert_eq!(engine.add_usd(), Some(Decimal::from_str("68").unwrap()));
    }

    #[tokio::test]
    async fn missing_sizing_degrades_to_none() {
        let engine = engine_with(|cfg| {
            cfg.sizing = None;
        })
        .await;
        assert_eq!(engine.base_usd(), None);
        assert_eq!(engine.add_usd(), None);
    }

    #[tokio::test]
    async fn main_timeframe_is_by_priority_not_order() {
        let engine = engine_with(|cfg| {
            cfg.timeframe_trend = vec!["1m".to_string(), "1h".to_string()];
        })
        .await;
        assert_eq!(engine.main_timeframe().as_deref(), Some("1h"));
    }
}
