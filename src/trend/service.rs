use crate::errors::BotError;
use crate::trend::store::TrendStore;
use crate::trend::types::{ConfirmArgs, TrendConfirmation};
use crate::trend::TrendProvider;
use crate::types::{Direction, Side, Trend};
use crate::utils::sort_timeframes_by_priority;
use async_trait::async_trait;
use std::sync::Arc;

/// Majority-vote trend evaluation over the confirmation ledger.
pub struct TrendService {
    store: Arc<TrendStore>,
}

impl TrendService {
    pub fn new(store: Arc<TrendStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<TrendStore> {
        Arc::clone(&self.store)
    }

    pub async fn confirm(&self, args: ConfirmArgs) -> Result<TrendConfirmation, BotError> {
        self.store.confirm(args).await
    }

    /// Count live confirmations for one direction on a pair. Used by the
    /// trend-pivot exit ladder.
    pub async fn live_count(
        &self,
        symbol: &str,
        timeframe: &str,
        direction: Side,
    ) -> Result<usize, BotError> {
        let rows = self.store.live(symbol, timeframe).await?;
        Ok(rows.iter().filter(|r| r.direction == direction).count())
    }

    pub async fn current_trend(&self, symbol: &str, timeframe: &str) -> Result<Trend, BotError> {
        let rows = self.store.live(symbol, timeframe).await?;
        Ok(vote(&rows))
    }
}

/// Majority vote, newest-first rows. An exact tie re-votes over the three
/// most recent rows; a still-tied result is neutral.
fn vote(rows: &[TrendConfirmation]) -> Trend {
    if rows.is_empty() {
        return Trend::Neutral;
    }

    let long_cnt = rows.iter().filter(|r| r.direction == Side::Long).count();
    let short_cnt = rows.len() - long_cnt;

    if long_cnt > short_cnt {
        return Trend::Long;
    }
    if short_cnt > long_cnt {
        return Trend::Short;
    }

    if rows.len() >= 3 {
        let last_three = &rows[..3];
        let last_long = last_three
            .iter()
            .filter(|r| r.direction == Side::Long)
            .count();
        let last_short = last_three.len() - last_long;
        if last_long > last_short {
            return Trend::Long;
        }
        if last_short > last_long {
            return Trend::Short;
        }
    }

    Trend::Neutral
}

#[async_trait]
impl TrendProvider for TrendService {
    async fn current(&self, symbol: &str, timeframe: &str) -> Result<Trend, BotError> {
        self.current_trend(symbol, timeframe).await
    }

    async fn agree_all(&self, symbol: &str, timeframes: &[String]) -> Result<Trend, BotError> {
        if timeframes.is_empty() {
            return Ok(Trend::Neutral);
        }
        let mut first: Option<Trend> = None;
        for tf in timeframes {
            let trend = self.current_trend(symbol, tf).await?;
            match first {
                None => first = Some(trend),
                Some(prev) if prev != trend => return Ok(Trend::Neutral),
                Some(_) => {}
            }
        }
        match first {
            Some(trend) if !trend.is_neutral() => Ok(trend),
            _ => Ok(Trend::Neutral),
        }
    }

    async fn agree_all_with_hierarchy(
        &self,
        symbol: &str,
        timeframes: &[String],
    ) -> Result<Trend, BotError> {
        if timeframes.is_empty() {
            return Ok(Trend::Neutral);
        }

        let sorted = sort_timeframes_by_priority(timeframes);
        let main_trend = self.current_trend(symbol, &sorted[0]).await?;
        if main_trend.is_neutral() {
            return Ok(Trend::Neutral);
        }

        // The rest may only agree with the main timeframe or sit neutral;
        // a single dissenter makes the whole read neutral.
        for tf in &sorted[1..] {
            let trend = self.current_trend(symbol, tf).await?;
            if trend != main_trend && !trend.is_neutral() {
                return Ok(Trend::Neutral);
            }
        }
        Ok(main_trend)
    }

    async fn can_add_position(
        &self,
        symbol: &str,
        timeframes: &[String],
        expected: Direction,
    ) -> Result<bool, BotError> {
        if timeframes.is_empty() {
            return Ok(false);
        }
        // Strict-all: neutral is not tolerated when adding to risk.
        for tf in timeframes {
            let trend = self.current_trend(symbol, tf).await?;
            if !trend.matches(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn should_close_position(
        &self,
        symbol: &str,
        timeframes: &[String],
        current: Direction,
    ) -> Result<bool, BotError> {
        if timeframes.is_empty() {
            return Ok(false);
        }
        let sorted = sort_timeframes_by_priority(timeframes);
        let main_trend = self.current_trend(symbol, &sorted[0]).await?;
        Ok(!main_trend.is_neutral() && !main_trend.matches(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::store::in_memory_store;

    async fn service() -> TrendService {
        let store = in_memory_store();
        store.init().await.unwrap();
        TrendService::new(Arc::new(store))
    }

    async fn confirm(svc: &TrendService, symbol: &str, tf: &str, side: Side) {
        svc.confirm(ConfirmArgs::new(symbol, tf, side)).await.unwrap();
    }

    #[tokio::test]
    async fn neutral_without_confirmations_and_idempotent() {
        let svc = service().await;
        assert_eq!(svc.current_trend("BTCUSDT", "1h").await.unwrap(), Trend::Neutral);
        // repeated calls with no new confirmations agree
        assert_eq!(svc.current_trend("BTCUSDT", "1h").await.unwrap(), Trend::Neutral);
    }

    #[tokio::test]
    async fn majority_wins() {
        let svc = service().await;
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        assert_eq!(svc.current_trend("BTCUSDT", "1h").await.unwrap(), Trend::Long);
    }

    #[tokio::test]
    async fn tie_revotes_over_last_three() {
        // Votes are L S S L (oldest -> newest): tied 2-2 overall, the last
        // three are S S L -> short wins the re-vote.
        let svc = service().await;
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        assert_eq!(svc.current_trend("BTCUSDT", "1h").await.unwrap(), Trend::Short);
    }

    #[tokio::test]
    async fn two_way_tie_is_neutral() {
        let svc = service().await;
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        assert_eq!(svc.current_trend("BTCUSDT", "1h").await.unwrap(), Trend::Neutral);
    }

    #[tokio::test]
    async fn agree_all_requires_identical_non_neutral() {
        let svc = service().await;
        let tfs = vec!["1h".to_string(), "1m".to_string()];

        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        // 1m has no data -> neutral -> no agreement
        assert_eq!(svc.agree_all("BTCUSDT", &tfs).await.unwrap(), Trend::Neutral);

        confirm(&svc, "BTCUSDT", "1m", Side::Long).await;
        assert_eq!(svc.agree_all("BTCUSDT", &tfs).await.unwrap(), Trend::Long);
    }

    #[tokio::test]
    async fn hierarchy_neutral_main_is_neutral() {
        let svc = service().await;
        let tfs = vec!["1h".to_string(), "1m".to_string()];
        // only the low-priority timeframe has a trend
        confirm(&svc, "BTCUSDT", "1m", Side::Long).await;
        assert_eq!(
            svc.agree_all_with_hierarchy("BTCUSDT", &tfs).await.unwrap(),
            Trend::Neutral
        );
    }

    #[tokio::test]
    async fn hierarchy_tolerates_neutral_followers() {
        let svc = service().await;
        let tfs = vec!["1m".to_string(), "1h".to_string()];
        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        // 1m neutral, main (1h) short -> short
        assert_eq!(
            svc.agree_all_with_hierarchy("BTCUSDT", &tfs).await.unwrap(),
            Trend::Short
        );

        // a dissenting follower forces neutral
        confirm(&svc, "BTCUSDT", "1m", Side::Long).await;
        assert_eq!(
            svc.agree_all_with_hierarchy("BTCUSDT", &tfs).await.unwrap(),
            Trend::Neutral
        );
    }

    #[tokio::test]
    async fn can_add_is_strict_all() {
        let svc = service().await;
        let tfs = vec!["1h".to_string(), "1m".to_string()];
        confirm(&svc, "BTCUSDT", "1h", Side::Long).await;
        // 1m neutral -> not allowed, neutral is not tolerated here
        assert!(!svc
            .can_add_position("BTCUSDT", &tfs, Direction::Long)
            .await
            .unwrap());

        confirm(&svc, "BTCUSDT", "1m", Side::Long).await;
        assert!(svc
            .can_add_position("BTCUSDT", &tfs, Direction::Long)
            .await
            .unwrap());
        assert!(!svc
            .can_add_position("BTCUSDT", &tfs, Direction::Short)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn should_close_only_on_main_reversal() {
        let svc = service().await;
        let tfs = vec!["1h".to_string(), "1m".to_string()];

        // neutral main -> hold
        assert!(!svc
            .should_close_position("BTCUSDT", &tfs, Direction::Long)
            .await
            .unwrap());

        confirm(&svc, "BTCUSDT", "1h", Side::Short).await;
        assert!(svc
            .should_close_position("BTCUSDT", &tfs, Direction::Long)
            .await
            .unwrap());
        assert!(!svc
            .should_close_position("BTCUSDT", &tfs, Direction::Short)
            .await
            .unwrap());
    }
}
