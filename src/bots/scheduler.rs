use crate::bots::engine::BotEngine;
use crate::bots::registry::BotsRegistry;
use crate::errors::BotError;
use crate::trend::TrendProvider;
use crate::logger::{self, LogTag};
use crate::shutdown;
use crate::types::{Direction, Trend};
use crate::utils::parse_interval;
use chrono::Utc;
use std::sync::Arc;

/// Symbol reported on when a bot has no symbol filter.
const DEFAULT_REPORT_SYMBOL: &str = "BTCUSDT";

/// Periodic per-bot trend reports over the bot's notification channel.
pub struct BotsScheduler {
    registry: Arc<BotsRegistry>,
}

impl BotsScheduler {
    pub fn new(registry: Arc<BotsRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn one report loop per bot that asked for scheduled reports.
    /// Loops stop at shutdown; report failures are logged, never fatal.
    pub fn start(&self) {
        for bot in self.registry.all() {
            if !bot.cfg.scheduled_notification {
                continue;
            }
            let interval = match &bot.cfg.scheduled_time {
                Some(raw) => parse_interval(raw),
                None => continue,
            };
            logger::info(
                LogTag::Scheduler,
                &format!("Scheduling {} reports every {:?}", bot.name(), interval),
            );

            let bot = Arc::clone(bot);
            tokio::spawn(async move {
                let notify = shutdown::shutdown_notify();
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if shutdown::is_shutting_down() {
                                break;
                            }
                            if let Err(e) = send_trend_report(&bot).await {
                                logger::error(
                                    LogTag::Scheduler,
                                    &format!("Trend report for {} failed: {}", bot.name(), e),
                                );
                            }
                        }
                        _ = notify.notified() => break,
                    }
                }
                logger::debug(
                    LogTag::Scheduler,
                    &format!("Report loop for {} stopped", bot.name()),
                );
            });
        }
    }

    pub fn registry(&self) -> Arc<BotsRegistry> {
        Arc::clone(&self.registry)
    }
}

/// Build and send one trend report for a bot.
pub async fn send_trend_report(bot: &BotEngine) -> Result<(), BotError> {
    let symbol = bot
        .cfg
        .symbol_filter
        .first()
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_REPORT_SYMBOL);

    let mut readings = Vec::new();
    for timeframe in &bot.cfg.timeframe_trend {
        let trend = bot.trend.current(symbol, timeframe).await?;
        readings.push((timeframe.clone(), trend));
    }

    let mut message = format!("{} - trend report\n", bot.name());
    message.push_str(&format!("Time: {}\n", Utc::now().format("%Y-%m-%d %H:%M UTC")));
    message.push_str(&format!(
        "Bot direction: {}\n",
        bot.cfg.direction.to_string().to_uppercase()
    ));
    message.push_str(&format!("Symbol: {}\n\n", symbol));

    for (timeframe, trend) in &readings {
        let marker = if trend.matches(bot.cfg.direction) {
            "+"
        } else if trend.is_neutral() {
            "o"
        } else {
            "-"
        };
        message.push_str(&format!(
            "{} {}: {}\n",
            marker,
            timeframe,
            trend.to_string().to_uppercase()
        ));
    }

    let status = trend_status(&readings, bot.cfg.direction);
    message.push_str(&format!("\nOverall: {}", status.label));
    message.push_str(&format!("\nSuggestion: {}", status.suggestion));

    bot.notify(&message).await;
    logger::info(
        LogTag::Scheduler,
        &format!("Trend report sent for {}", bot.name()),
    );
    Ok(())
}

struct TrendStatus {
    label: String,
    suggestion: &'static str,
}

fn trend_status(readings: &[(String, Trend)], direction: Direction) -> TrendStatus {
    let trends: Vec<Trend> = readings.iter().map(|(_, t)| *t).collect();
    let with_bot = trends.iter().filter(|t| t.matches(direction)).count();

    if !trends.is_empty() && with_bot == trends.len() {
        TrendStatus {
            label: format!(
                "STRONG {} - every timeframe agrees",
                direction.to_string().to_uppercase()
            ),
            suggestion: "trend is strong, positions may be opened",
        }
    } else if with_bot > 0 {
        TrendStatus {
            label: format!(
                "MIXED {} - partial agreement",
                direction.to_string().to_uppercase()
            ),
            suggestion: "trend is mixed, trade with caution",
        }
    } else if trends.iter().all(|t| t.is_neutral()) {
        TrendStatus {
            label: "NEUTRAL - no clear direction".to_string(),
            suggestion: "wait for a clear signal",
        }
    } else {
        let opposite = match direction {
            Direction::Long => "SHORT",
            Direction::Short => "LONG",
            Direction::Both => "OPPOSITE",
        };
        TrendStatus {
            label: format!("OPPOSITE {} - trend reversed", opposite),
            suggestion: "trend reversed, consider closing positions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{harness, push_trend};
    use crate::types::Side;

    #[tokio::test]
    async fn report_lists_every_timeframe_and_status() {
        let h = harness().await;
        push_trend(&h, "ETHUSDT", "1h", Side::Long).await;
        push_trend(&h, "ETHUSDT", "1m", Side::Long).await;

        let bot = h.engine(Box::new(crate::testkit::NoopStrategy), |cfg| {
            cfg.symbol_filter = vec!["ETHUSDT".to_string()];
            cfg.timeframe_trend = vec!["1h".to_string(), "1m".to_string()];
        });
        send_trend_report(&bot).await.unwrap();

        let messages = h.notifier.messages();
        let report = messages.last().unwrap();
        assert!(report.contains("ETHUSDT"));
        assert!(report.contains("1h: LONG"));
        assert!(report.contains("1m: LONG"));
        assert!(report.contains("STRONG LONG"));
    }

    #[tokio::test]
    async fn report_flags_reversal() {
        let h = harness().await;
        push_trend(&h, "BTCUSDT", "1h", Side::Short).await;

        let bot = h.engine(Box::new(crate::testkit::NoopStrategy), |cfg| {
            cfg.timeframe_trend = vec!["1h".to_string()];
        });
        send_trend_report(&bot).await.unwrap();

        let messages = h.notifier.messages();
        assert!(messages.last().unwrap().contains("reversed"));
    }

    #[test]
    fn status_classification() {
        let status = trend_status(
            &[("1h".to_string(), Trend::Long), ("1m".to_string(), Trend::Neutral)],
            Direction::Long,
        );
        assert!(status.label.contains("MIXED"));

        let status = trend_status(
            &[("1h".to_string(), Trend::Neutral)],
            Direction::Long,
        );
        assert!(status.label.contains("NEUTRAL"));
    }
}
