pub mod service;
pub mod store;
pub mod types;

pub use service::TrendService;
pub use store::TrendStore;
pub use types::{ConfirmArgs, TrendConfirmation};

use crate::errors::BotError;
use crate::types::{Direction, Trend};
use async_trait::async_trait;

/// Trend checks consumed by bot engines and strategies.
#[async_trait]
pub trait TrendProvider: Send + Sync {
    /// Majority-vote trend for one (symbol, timeframe) pair.
    async fn current(&self, symbol: &str, timeframe: &str) -> Result<Trend, BotError>;

    /// Non-neutral direction shared by every timeframe, else neutral.
    async fn agree_all(&self, symbol: &str, timeframes: &[String]) -> Result<Trend, BotError>;

    /// Hierarchy agreement: the main timeframe decides, the others may only
    /// agree or stay neutral.
    async fn agree_all_with_hierarchy(
        &self,
        symbol: &str,
        timeframes: &[String],
    ) -> Result<Trend, BotError>;

    /// Strict add gate: every timeframe must equal the expected direction.
    async fn can_add_position(
        &self,
        symbol: &str,
        timeframes: &[String],
        expected: Direction,
    ) -> Result<bool, BotError>;

    /// Close gate: the main timeframe reversed against the position.
    async fn should_close_position(
        &self,
        symbol: &str,
        timeframes: &[String],
        current: Direction,
    ) -> Result<bool, BotError>;
}
