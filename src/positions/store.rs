use crate::errors::BotError;
use crate::logger::{self, LogTag};
use crate::positions::types::{PnlReport, Position, PositionMeta, PositionStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA_POSITIONS: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open', -- 'open' or 'closed'
    avg_entry_price TEXT NOT NULL, -- decimal string
    amount_usd TEXT NOT NULL, -- notional, decimal string
    fills_count INTEGER NOT NULL DEFAULT 1,
    opened_at TEXT,
    closed_at TEXT,
    meta TEXT, -- strategy-specific JSON, tagged by type
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_positions_bot_symbol ON positions(bot_name, symbol, status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_one_open
    ON positions(bot_name, symbol) WHERE status = 'open';
"#;

/// Durable position rows, one per (bot, symbol) lifecycle.
pub struct PositionsStore {
    conn: Arc<Mutex<Connection>>,
}

impl PositionsStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init(&self) -> Result<(), BotError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA_POSITIONS)?;
        Ok(())
    }

    pub async fn find_open(
        &self,
        bot_name: &str,
        symbol: &str,
    ) -> Result<Option<Position>, BotError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("{} WHERE bot_name = ?1 AND symbol = ?2 AND status = 'open'", SELECT),
                params![bot_name, symbol],
                row_to_position,
            )
            .optional()?;
        Ok(row)
    }

    /// Create a fresh open position with one fill.
    ///
    /// The partial unique index rejects a second open row for the same
    /// (bot, symbol), which keeps the at-most-one-open invariant even under
    /// racing writers.
    pub async fn open(
        &self,
        bot_name: &str,
        symbol: &str,
        price: Decimal,
        amount_usd: Decimal,
    ) -> Result<Position, BotError> {
        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO positions (bot_name, symbol, status, avg_entry_price, amount_usd, fills_count, opened_at)
             VALUES (?1, ?2, 'open', ?3, ?4, 1, ?5)",
            params![bot_name, symbol, price.to_string(), amount_usd.to_string(), ts(now)],
        )?;
        let id = conn.last_insert_rowid();
        logger::debug(
            LogTag::Positions,
            &format!("Opened position #{} {} {} @{} ${}", id, bot_name, symbol, price, amount_usd),
        );
        let row = conn.query_row(&format!("{} WHERE id = ?1", SELECT), params![id], row_to_position)?;
        Ok(row)
    }

    /// Fold an add fill into the position: notional-weighted average entry
    /// price, summed notional, one more fill. Mutates `position` in place
    /// to match the persisted row.
    pub async fn add(
        &self,
        position: &mut Position,
        add_price: Decimal,
        add_usd: Decimal,
    ) -> Result<(), BotError> {
        let total_cost = position.amount_usd * position.avg_entry_price + add_usd * add_price;
        let total_amount = position.amount_usd + add_usd;
        if total_amount.is_zero() {
            return Err(BotError::validation("add would produce a zero-notional position"));
        }
        position.avg_entry_price = total_cost / total_amount;
        position.amount_usd = total_amount;
        position.fills_count += 1;

        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions
             SET avg_entry_price = ?1, amount_usd = ?2, fills_count = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                position.avg_entry_price.to_string(),
                position.amount_usd.to_string(),
                position.fills_count,
                ts(Utc::now()),
                position.id
            ],
        )?;
        Ok(())
    }

    /// Shrink the notional after a partial close, keeping the average entry.
    pub async fn reduce(&self, position: &mut Position, new_amount: Decimal) -> Result<(), BotError> {
        position.amount_usd = new_amount;
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET amount_usd = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_amount.to_string(), ts(Utc::now()), position.id],
        )?;
        Ok(())
    }

    /// Flip the row to closed. Exchange-side closure is the caller's
    /// responsibility; the store only records the outcome.
    pub async fn close(&self, position: &mut Position, _close_price: Decimal) -> Result<(), BotError> {
        let now = Utc::now();
        position.status = PositionStatus::Closed;
        position.closed_at = Some(now);

        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET status = 'closed', closed_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![ts(now), ts(now), position.id],
        )?;
        logger::debug(
            LogTag::Positions,
            &format!("Closed position #{} {} {}", position.id, position.bot_name, position.symbol),
        );
        Ok(())
    }

    /// Persist the strategy meta of a position.
    pub async fn update_meta(&self, position: &Position) -> Result<(), BotError> {
        let meta_json = match &position.meta {
            Some(meta) => Some(
                serde_json::to_string(meta)
                    .map_err(|e| BotError::validation(format!("unserializable meta: {}", e)))?,
            ),
            None => None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE positions SET meta = ?1, updated_at = ?2 WHERE id = ?3",
            params![meta_json, ts(Utc::now()), position.id],
        )?;
        Ok(())
    }

    /// Every open position across all bots, oldest first.
    pub async fn all_open(&self) -> Result<Vec<Position>, BotError> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare(&format!("{} WHERE status = 'open' ORDER BY opened_at ASC", SELECT))?;
        let rows = stmt.query_map([], row_to_position)?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(row?);
        }
        Ok(positions)
    }
}

const SELECT: &str = "SELECT id, bot_name, symbol, status, avg_entry_price, amount_usd, \
                      fills_count, opened_at, closed_at, meta FROM positions";

/// PnL from notional and average entry: quantity = notional / avg entry,
/// pnl = quantity x current - notional.
pub fn calculate_pnl(position: &Position, current_price: Decimal) -> PnlReport {
    let avg = position.avg_entry_price;
    let amount = position.amount_usd;
    let total_size = if avg.is_zero() { Decimal::ZERO } else { amount / avg };
    let current_value = total_size * current_price;
    let pnl = current_value - amount;
    let pnl_percent = if amount.is_zero() {
        Decimal::ZERO
    } else {
        pnl / amount * Decimal::new(100, 0)
    };
    PnlReport {
        total_size: total_size.round_dp(8),
        current_value: current_value.round_dp(2),
        pnl: pnl.round_dp(2),
        pnl_percent: pnl_percent.round_dp(2),
        avg_entry_price: avg,
        current_price,
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    let status: String = row.get(3)?;
    let avg: String = row.get(4)?;
    let amount: String = row.get(5)?;
    let opened_at: Option<String> = row.get(7)?;
    let closed_at: Option<String> = row.get(8)?;
    let meta: Option<String> = row.get(9)?;
    Ok(Position {
        id: row.get(0)?,
        bot_name: row.get(1)?,
        symbol: row.get(2)?,
        status: if status == "closed" {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        },
        avg_entry_price: Decimal::from_str(&avg).unwrap_or_default(),
        amount_usd: Decimal::from_str(&amount).unwrap_or_default(),
        fills_count: row.get(6)?,
        opened_at: opened_at.as_deref().and_then(parse_ts),
        closed_at: closed_at.as_deref().and_then(parse_ts),
        meta: meta.and_then(|m| serde_json::from_str::<PositionMeta>(&m).ok()),
    })
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
pub(crate) fn in_memory_store() -> PositionsStore {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    PositionsStore::new(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn open_then_find() {
        let store = in_memory_store();
        store.init().await.unwrap();

        let p = store
            .open("bot1", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        assert_eq!(p.fills_count, 1);
        assert_eq!(p.avg_entry_price, d("50000"));
        assert!(p.is_open());
        assert!(p.opened_at.is_some());

        let found = store.find_open("bot1", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(found.id, p.id);
        assert!(store.find_open("bot1", "ETHUSDT").await.unwrap().is_none());
        assert!(store.find_open("bot2", "BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn at_most_one_open_row_per_bot_symbol() {
        let store = in_memory_store();
        store.init().await.unwrap();

        store.open("bot1", "BTCUSDT", d("50000"), d("200")).await.unwrap();
        // second open for the same key is rejected by the partial index
        assert!(store.open("bot1", "BTCUSDT", d("51000"), d("200")).await.is_err());

        // after closing, the key can open again
        let mut p = store.find_open("bot1", "BTCUSDT").await.unwrap().unwrap();
        store.close(&mut p, d("52000")).await.unwrap();
        store.open("bot1", "BTCUSDT", d("53000"), d("200")).await.unwrap();
    }

    #[tokio::test]
    async fn add_recomputes_weighted_average() {
        let store = in_memory_store();
        store.init().await.unwrap();

        let mut p = store
            .open("bot1", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        store.add(&mut p, d("51000"), d("100")).await.unwrap();

        // (200*50000 + 100*51000) / 300
        let expected = d("50333.333333333333333333333333");
        assert!((p.avg_entry_price - expected).abs() < d("0.000001"));
        assert_eq!(p.amount_usd, d("300"));
        assert_eq!(p.fills_count, 2);

        // persisted row agrees with the in-memory struct
        let reread = store.find_open("bot1", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(reread.amount_usd, p.amount_usd);
        assert_eq!(reread.fills_count, 2);
        assert!((reread.avg_entry_price - expected).abs() < d("0.000001"));
    }

    #[tokio::test]
    async fn close_flips_status_and_keeps_row() {
        let store = in_memory_store();
        store.init().await.unwrap();

        let mut p = store
            .open("bot1", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        store.close(&mut p, d("55000")).await.unwrap();

        assert_eq!(p.status, PositionStatus::Closed);
        assert!(p.closed_at.is_some());
        assert!(store.find_open("bot1", "BTCUSDT").await.unwrap().is_none());
        assert!(store.all_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn meta_roundtrip() {
        let store = in_memory_store();
        store.init().await.unwrap();

        let mut p = store
            .open("dom", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();
        let stamp = Utc::now();
        p.meta = Some(PositionMeta::Domination {
            side: Side::Short,
            last_continuation: stamp,
        });
        store.update_meta(&p).await.unwrap();

        let reread = store.find_open("dom", "BTCUSDT").await.unwrap().unwrap();
        match reread.meta {
            Some(PositionMeta::Domination { side, last_continuation }) => {
                assert_eq!(side, Side::Short);
                assert_eq!(last_continuation, stamp);
            }
            other => panic!("unexpected meta: {:?}", other),
        }
    }

    #[tokio::test]
    async fn pnl_derives_quantity_from_notional() {
        let store = in_memory_store();
        store.init().await.unwrap();
        let p = store
            .open("bot1", "BTCUSDT", d("50000"), d("200"))
            .await
            .unwrap();

        let report = calculate_pnl(&p, d("55000"));
        assert_eq!(report.total_size, d("0.004"));
        assert_eq!(report.current_value, d("220.00"));
        assert_eq!(report.pnl, d("20.00"));
        assert_eq!(report.pnl_percent, d("10.00"));
    }

    #[tokio::test]
    async fn reduce_keeps_average_entry() {
        let store = in_memory_store();
        store.init().await.unwrap();
        let mut p = store
            .open("bot1", "BTCUSDT", d("50000"), d("300"))
            .await
            .unwrap();
        store.reduce(&mut p, d("150")).await.unwrap();

        let reread = store.find_open("bot1", "BTCUSDT").await.unwrap().unwrap();
        assert_eq!(reread.amount_usd, d("150"));
        assert_eq!(reread.avg_entry_price, d("50000"));
        assert_eq!(reread.fills_count, 1);
    }
}
