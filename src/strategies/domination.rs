use crate::alerts::Alert;
use crate::bots::engine::BotEngine;
use crate::bots::registry::BotsRegistry;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::positions::{PositionLocks, PositionMeta, PositionsStore};
use crate::shutdown;
use crate::strategies::Strategy;
use crate::types::Side;
use crate::utils::format_duration;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Fixed notional for every domination entry.
const ENTRY_USD: i64 = 200;
/// A position with no continuation for this long gets swept.
const CONTINUATION_TIMEOUT_MINUTES: i64 = 30;
/// Sweep cadence.
const SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Binary long/short entry on a dominance signal, kept alive by periodic
/// continuation signals. The background sweep force-closes positions whose
/// continuation went stale.
pub struct DominationStrategy {
    store: Arc<PositionsStore>,
}

impl DominationStrategy {
    pub fn new(store: Arc<PositionsStore>) -> Self {
        Self { store }
    }

    async fn enter(&self, bot: &BotEngine, alert: &Alert, side: Side) -> Result<(), BotError> {
        if self
            .store
            .find_open(bot.name(), &alert.symbol)
            .await?
            .is_some()
        {
            logger::info(
                LogTag::Strategy,
                &format!(
                    "{}: {} already open, dominance signal ignored",
                    bot.name(),
                    alert.symbol
                ),
            );
            return Ok(());
        }

        let mut position = self
            .store
            .open(bot.name(), &alert.symbol, alert.price, Decimal::new(ENTRY_USD, 0))
            .await?;
        position.meta = Some(PositionMeta::Domination {
            side,
            last_continuation: Utc::now(),
        });
        self.store.update_meta(&position).await?;

        bot.notify(&format!(
            "{}: {} {} @{}\nSize: ${}\nExpecting a continuation every {} minutes",
            bot.name(),
            side.to_string().to_uppercase(),
            alert.symbol,
            alert.price,
            ENTRY_USD,
            CONTINUATION_TIMEOUT_MINUTES
        ))
        .await;
        Ok(())
    }

    async fn continue_position(
        &self,
        bot: &BotEngine,
        alert: &Alert,
        side: Side,
    ) -> Result<(), BotError> {
        let existing = self.store.find_open(bot.name(), &alert.symbol).await?;
        let mut existing = match existing {
            Some(p)
                if matches!(
                    p.meta,
                    Some(PositionMeta::Domination { side: s, .. }) if s == side
                ) =>
            {
                p
            }
            _ => {
                logger::info(
                    LogTag::Strategy,
                    &format!(
                        "{}: no open {} domination position for {}",
                        bot.name(),
                        side,
                        alert.symbol
                    ),
                );
                return Ok(());
            }
        };

        let now = Utc::now();
        existing.meta = Some(PositionMeta::Domination {
            side,
            last_continuation: now,
        });
        self.store.update_meta(&existing).await?;

        bot.notify(&format!(
            "{}: {} continuation {} @{}\nRefreshed at {}\nNext expected within {} minutes",
            bot.name(),
            side,
            alert.symbol,
            alert.price,
            now.format("%H:%M:%S UTC"),
            CONTINUATION_TIMEOUT_MINUTES
        ))
        .await;
        Ok(())
    }
}

#[async_trait]
impl Strategy for DominationStrategy {
    fn name(&self) -> &'static str {
        "domination"
    }

    async fn on_buyer_domination(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.enter(bot, alert, Side::Long).await
    }

    async fn on_seller_domination(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.enter(bot, alert, Side::Short).await
    }

    async fn on_buyer_continuation(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.continue_position(bot, alert, Side::Long).await
    }

    async fn on_seller_continuation(&self, bot: &BotEngine, alert: &Alert) -> Result<(), BotError> {
        self.continue_position(bot, alert, Side::Short).await
    }
}

/// Close one timed-out domination position: exchange first (flat counts as
/// success), then the row, then the owning bot's channel.
async fn sweep_close(
    registry: &BotsRegistry,
    store: &PositionsStore,
    locks: &PositionLocks,
    bot_name: &str,
    symbol: &str,
) -> Result<(), BotError> {
    let _guard = locks.acquire(bot_name, symbol).await;

    // re-check under the lock: a continuation or close may have landed
    let existing = store.find_open(bot_name, symbol).await?;
    let mut existing = match existing {
        Some(p) => p,
        None => return Ok(()),
    };
    let last = match existing.last_continuation() {
        Some(t) => t,
        None => return Ok(()),
    };
    if Utc::now() - last <= Duration::minutes(CONTINUATION_TIMEOUT_MINUTES) {
        return Ok(());
    }

    let side = match existing.meta {
        Some(PositionMeta::Domination { side, .. }) => side,
        _ => return Ok(()),
    };

    let bot = registry.get(bot_name);
    if let Some(bot) = &bot {
        match bot.exchange.flash_close(symbol, Some(side), None).await {
            Ok(()) => {}
            Err(e) if e.is_position_already_closed() => {}
            Err(e) => {
                logger::error(
                    LogTag::Strategy,
                    &format!("Sweep close of {} ({}) failed: {}", symbol, bot_name, e),
                );
                return Err(e);
            }
        }
    }

    let close_price = existing.avg_entry_price;
    let opened_at = existing.opened_at;
    store.close(&mut existing, close_price).await?;

    let exit_time = Utc::now();
    let duration = opened_at
        .map(|t| format_duration(t, exit_time))
        .unwrap_or_else(|| "n/a".to_string());
    let message = format!(
        "{}: {} {} CLOSED\nEntry: ${}\nClosed: {}\nHeld: {}\nReason: continuation timeout",
        bot_name,
        side.to_string().to_uppercase(),
        symbol,
        close_price,
        exit_time.format("%H:%M:%S UTC"),
        duration
    );
    match bot {
        Some(bot) => bot.notify(&message).await,
        None => logger::warning(LogTag::Strategy, &message),
    }
    Ok(())
}

/// One pass over all open domination positions.
pub async fn sweep_once(
    registry: &BotsRegistry,
    store: &PositionsStore,
    locks: &PositionLocks,
) -> Result<usize, BotError> {
    let timeout = Duration::minutes(CONTINUATION_TIMEOUT_MINUTES);
    let now = Utc::now();
    let mut closed = 0;

    for position in store.all_open().await? {
        let is_domination = matches!(position.meta, Some(PositionMeta::Domination { .. }));
        if !is_domination {
            continue;
        }
        let stale = position
            .last_continuation()
            .map(|t| now - t > timeout)
            .unwrap_or(false);
        if !stale {
            continue;
        }
        logger::info(
            LogTag::Strategy,
            &format!(
                "Continuation timeout for {} ({}), closing",
                position.symbol, position.bot_name
            ),
        );
        if sweep_close(registry, store, locks, &position.bot_name, &position.symbol)
            .await
            .is_ok()
        {
            closed += 1;
        }
    }
    Ok(closed)
}

/// Fixed wall-clock sweep, independent of alert traffic. Stops on shutdown.
pub fn spawn_continuation_sweep(
    registry: Arc<BotsRegistry>,
    store: Arc<PositionsStore>,
    locks: Arc<PositionLocks>,
) {
    tokio::spawn(async move {
        let notify = shutdown::shutdown_notify();
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        interval.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if shutdown::is_shutting_down() {
                        break;
                    }
                    match sweep_once(&registry, &store, &locks).await {
                        Ok(0) => {}
                        Ok(n) => logger::info(
                            LogTag::Strategy,
                            &format!("Continuation sweep closed {} position(s)", n),
                        ),
                        Err(e) => logger::error(
                            LogTag::Strategy,
                            &format!("Continuation sweep failed: {}", e),
                        ),
                    }
                }
                _ = notify.notified() => break,
            }
        }
        logger::debug(LogTag::Strategy, "Continuation sweep stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{harness, TestHarness};

    fn strategy(h: &TestHarness) -> Box<dyn Strategy> {
        Box::new(DominationStrategy::new(Arc::clone(&h.store)))
    }

    #[tokio::test]
    async fn dominance_enters_once() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |_| {});

        bot.process(&h.alert("BuyerDomination", "BTCUSDT", "50000"))
            .await
            .unwrap();
        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.amount_usd, Decimal::new(200, 0));
        assert!(matches!(
            p.meta,
            Some(PositionMeta::Domination { side: Side::Long, .. })
        ));

        // duplicate dominance signal does not double-enter
        bot.process(&h.alert("BuyerDomination", "BTCUSDT", "51000"))
            .await
            .unwrap();
        let p = h.store.find_open("TestBot", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(p.fills_count, 1);
    }

    #[tokio::test]
    async fn seller_dominance_enters_short() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |_| {});

        bot.process(&h.alert("SellerDomination", "ETHUSDT", "1800"))
            .await
            .unwrap();
        let p = h.store.find_open("TestBot", "ETHUSDT").await.unwrap().unwrap();
        assert!(matches!(
            p.meta,
            Some(PositionMeta::Domination { side: Side::Short, .. })
        ));
    }

    #[tokio::test]
    async fn continuation_refreshes_matching_side_only() {
        let h = harness().await;
        let bot = h.engine(strategy(&h), |_| {});

        bot.process(&h.alert("BuyerDomination", "BTCUSDT", "50000"))
            .await
            .unwrap();
        let before = h
            .store
            .find_open("TestBot", "BTCUSDT")
            .await
            .unwrap()
            .unwrap()
            .last_continuation()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        // wrong side: ignored
        bot.process(&h.alert("SellerContinuation", "BTCUSDT", "50100"))
            .await
            .unwrap();
        let unchanged = h
            .store
            .find_open("TestBot", "BTCUSDT")
            .await
            .unwrap()
            .unwrap()
            .last_continuation()
            .unwrap();
        assert_eq!(unchanged, before);

        bot.process(&h.alert("BuyerContinuation", "BTCUSDT", "50100"))
            .await
            .unwrap();
        let refreshed = h
            .store
            .find_open("TestBot", "BTCUSDT")
            .await
            .unwrap()
            .unwrap()
            .last_continuation()
            .unwrap();
        assert!(refreshed > before);
    }
}
