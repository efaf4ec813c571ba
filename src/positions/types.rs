use crate::types::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

/// Strategy-specific fields stored alongside the position row.
///
/// One tagged variant per strategy that needs durable extras; everything
/// else lives in the shared columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PositionMeta {
    Domination {
        side: Side,
        last_continuation: DateTime<Utc>,
    },
    TrendPivot {
        original_direction: Side,
        closed_confirmations: u32,
    },
    ThreeAlerts {
        side: Side,
    },
}

/// One persisted position, keyed by (bot, symbol).
///
/// At most one row per key may be open at a time; the store enforces this
/// with a partial unique index. `amount_usd` is notional, not token
/// quantity. Rows flip to closed and are never deleted.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: i64,
    pub bot_name: String,
    pub symbol: String,
    pub status: PositionStatus,
    pub avg_entry_price: Decimal,
    pub amount_usd: Decimal,
    pub fills_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub meta: Option<PositionMeta>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Continuation freshness anchor for domination positions.
    pub fn last_continuation(&self) -> Option<DateTime<Utc>> {
        match &self.meta {
            Some(PositionMeta::Domination {
                last_continuation, ..
            }) => Some(*last_continuation),
            _ => self.opened_at,
        }
    }
}

/// Derived profit-and-loss numbers for notifications.
#[derive(Debug, Clone)]
pub struct PnlReport {
    /// Token quantity implied by notional / average entry.
    pub total_size: Decimal,
    pub current_value: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub avg_entry_price: Decimal,
    pub current_price: Decimal,
}
