use crate::bots::engine::BotEngine;
use crate::config::Config;
use crate::exchange::{BitgetGateway, ExchangeGateway, NoopExchange};
use crate::logger::{self, LogTag};
use crate::positions::{PositionLocks, PositionsStore};
use crate::strategies::{
    DominationStrategy, PartialCloseStrategy, SmartVolDefaultStrategy, SmartVolumeStrategy,
    Strategy, ThreeAlertsStrategy, TrendPivotStrategy,
};
use crate::telegram::{Notifier, TelegramNotifier};
use crate::trend::{TrendProvider, TrendService};
use crate::volume::VolumeUpService;
use rust_decimal::Decimal;
use std::sync::Arc;

/// All live bot engines, built once from config at startup.
#[derive(Default)]
pub struct BotsRegistry {
    bots: Vec<Arc<BotEngine>>,
}

impl BotsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, engine: BotEngine) {
        self.bots.push(Arc::new(engine));
    }

    pub fn all(&self) -> &[Arc<BotEngine>] {
        &self.bots
    }

    pub fn get(&self, name: &str) -> Option<Arc<BotEngine>> {
        self.bots.iter().find(|b| b.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Build engines for every enabled, correctly configured bot.
    ///
    /// A broken entry is logged and skipped; it never stops the others
    /// from starting.
    pub fn init_from_config(
        config: &Config,
        positions: Arc<PositionsStore>,
        volume: Arc<VolumeUpService>,
        trend: Arc<TrendService>,
        locks: Arc<PositionLocks>,
    ) -> Self {
        let mut registry = Self::new();
        logger::info(
            LogTag::Bots,
            &format!("Initializing bots from config ({} entries)", config.bots.len()),
        );

        for cfg in &config.bots {
            if !cfg.enabled {
                logger::info(LogTag::Bots, &format!("{} disabled, skipping", cfg.name));
                continue;
            }

            let tag = cfg.strategy_tag().to_string();

            // the smart-vol family trades off sizing; domination and the
            // candle-pattern family carry their own fixed sizing rules
            if tag != "domination" {
                let sizing_ok = cfg
                    .sizing
                    .as_ref()
                    .map(|s| s.base_usd > Decimal::ZERO && s.add_fraction > Decimal::ZERO)
                    .unwrap_or(false);
                if !sizing_ok {
                    logger::error(
                        LogTag::Bots,
                        &format!("{}: invalid sizing config, bot skipped", cfg.name),
                    );
                    continue;
                }
            }

            let channel = match config.telegram.get(&cfg.telegram_channel) {
                Some(c) => c,
                None => {
                    logger::error(
                        LogTag::Bots,
                        &format!(
                            "{}: telegram channel {} is not configured, bot skipped",
                            cfg.name, cfg.telegram_channel
                        ),
                    );
                    continue;
                }
            };
            let notifier: Arc<dyn Notifier> =
                match TelegramNotifier::new(&cfg.telegram_channel, channel) {
                    Ok(n) => Arc::new(n),
                    Err(e) => {
                        logger::error(LogTag::Bots, &format!("{}: {}, bot skipped", cfg.name, e));
                        continue;
                    }
                };

            let exchange: Arc<dyn ExchangeGateway> = if cfg.prod {
                match config.exchange.get(&cfg.exchange_profile) {
                    Some(profile) => Arc::new(BitgetGateway::new(profile)),
                    None => {
                        logger::error(
                            LogTag::Bots,
                            &format!(
                                "{}: exchange profile {} is not configured, bot skipped",
                                cfg.name, cfg.exchange_profile
                            ),
                        );
                        continue;
                    }
                }
            } else {
                Arc::new(NoopExchange)
            };

            let strategy: Box<dyn Strategy> = match tag.as_str() {
                "domination" => Box::new(DominationStrategy::new(Arc::clone(&positions))),
                "partial-close" => Box::new(PartialCloseStrategy::new(Arc::clone(&positions))),
                "smartvolume" => Box::new(SmartVolumeStrategy::new(Arc::clone(&positions))),
                "trend-pivot" => Box::new(TrendPivotStrategy::new(
                    Arc::clone(&positions),
                    Arc::clone(&trend),
                )),
                "three-alerts" => Box::new(ThreeAlertsStrategy::new(Arc::clone(&positions))),
                "default" => Box::new(SmartVolDefaultStrategy::new(
                    Arc::clone(&positions),
                    Arc::clone(&volume),
                )),
                other => {
                    logger::error(
                        LogTag::Bots,
                        &format!("{}: unknown strategy tag {}, bot skipped", cfg.name, other),
                    );
                    continue;
                }
            };

            logger::info(
                LogTag::Bots,
                &format!(
                    "Registering {} (strategy {}, direction {}, timeframes {})",
                    cfg.name,
                    tag,
                    cfg.direction,
                    cfg.timeframe_trend.join(",")
                ),
            );
            registry.insert(BotEngine::new(
                cfg.clone(),
                exchange,
                notifier,
                Arc::clone(&trend) as Arc<dyn TrendProvider>,
                strategy,
                Arc::clone(&locks),
            ));
        }

        logger::info(
            LogTag::Bots,
            &format!("{} bot(s) registered", registry.len()),
        );
        registry
    }
}
