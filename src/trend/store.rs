use crate::errors::BotError;
use crate::logger::{self, LogTag};
use crate::trend::types::{ConfirmArgs, TrendConfirmation};
use crate::types::Side;
use crate::utils::timeframe_duration;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA_TREND_CONFIRMATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS trend_confirmations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    direction TEXT NOT NULL, -- 'long' or 'short'
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    source TEXT,
    name TEXT, -- named-alert identity (meta.name), unique per symbol when set
    meta TEXT
);

CREATE INDEX IF NOT EXISTS idx_trend_symbol_tf ON trend_confirmations(symbol, timeframe);
CREATE UNIQUE INDEX IF NOT EXISTS idx_trend_named
    ON trend_confirmations(symbol, name) WHERE name IS NOT NULL;
"#;

/// Durable ledger of trend confirmations.
pub struct TrendStore {
    conn: Arc<Mutex<Connection>>,
}

impl TrendStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn init(&self) -> Result<(), BotError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA_TREND_CONFIRMATIONS)?;
        Ok(())
    }

    /// Record a confirmation with TTL = 2x the timeframe duration.
    ///
    /// A named confirmation replaces its own previous row for the symbol;
    /// unnamed confirmations always append a fresh vote.
    pub async fn confirm(&self, args: ConfirmArgs) -> Result<TrendConfirmation, BotError> {
        let symbol = args.symbol.to_uppercase();
        let timeframe = args.timeframe.to_lowercase();
        let ttl = timeframe_duration(&timeframe)
            .ok_or_else(|| BotError::validation(format!("invalid timeframe \"{}\"", timeframe)))?;
        let now = Utc::now();
        let expires_at = now + ttl * 2;
        let direction = args.direction.to_string();
        let meta_json = args
            .meta
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        let name = args.name().map(|n| n.to_string());

        let conn = self.conn.lock().await;

        if let Some(ref name) = name {
            let updated = conn.execute(
                "UPDATE trend_confirmations
                 SET direction = ?1, timeframe = ?2, created_at = ?3, expires_at = ?4,
                     source = ?5, meta = ?6
                 WHERE symbol = ?7 AND name = ?8",
                params![
                    direction,
                    timeframe,
                    now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    expires_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    args.source,
                    meta_json,
                    symbol,
                    name
                ],
            )?;
            if updated > 0 {
                logger::debug(
                    LogTag::Trend,
                    &format!(
                        "Refreshed named confirmation {} for {} ({}): {}",
                        name, symbol, timeframe, direction
                    ),
                );
                let row = conn.query_row(
                    "SELECT id, symbol, timeframe, direction, created_at, expires_at, source, name, meta
                     FROM trend_confirmations WHERE symbol = ?1 AND name = ?2",
                    params![symbol, name],
                    row_to_confirmation,
                )?;
                return Ok(row);
            }
        }

        conn.execute(
            "INSERT INTO trend_confirmations
                 (symbol, timeframe, direction, created_at, expires_at, source, name, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                symbol,
                timeframe,
                direction,
                now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                expires_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                args.source,
                name,
                meta_json
            ],
        )?;
        let id = conn.last_insert_rowid();
        let row = conn.query_row(
            "SELECT id, symbol, timeframe, direction, created_at, expires_at, source, name, meta
             FROM trend_confirmations WHERE id = ?1",
            params![id],
            row_to_confirmation,
        )?;
        Ok(row)
    }

    /// All non-expired confirmations for a pair, newest first.
    pub async fn live(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Vec<TrendConfirmation>, BotError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, timeframe, direction, created_at, expires_at, source, name, meta
             FROM trend_confirmations
             WHERE symbol = ?1 AND timeframe = ?2 AND expires_at > ?3
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(
            params![
                symbol.to_uppercase(),
                timeframe.to_lowercase(),
                Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            ],
            row_to_confirmation,
        )?;
        let mut confirmations = Vec::new();
        for row in rows {
            confirmations.push(row?);
        }
        Ok(confirmations)
    }
}

fn row_to_confirmation(row: &Row<'_>) -> rusqlite::Result<TrendConfirmation> {
    let direction: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let expires_at: String = row.get(5)?;
    let meta: Option<String> = row.get(8)?;
    Ok(TrendConfirmation {
        id: row.get(0)?,
        symbol: row.get(1)?,
        timeframe: row.get(2)?,
        direction: if direction == "short" {
            Side::Short
        } else {
            Side::Long
        },
        created_at: parse_timestamp(&created_at),
        expires_at: parse_timestamp(&expires_at),
        source: row.get(6)?,
        name: row.get(7)?,
        meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
pub(crate) fn in_memory_store() -> TrendStore {
    let conn = Connection::open_in_memory().expect("in-memory sqlite");
    TrendStore::new(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unnamed_confirmations_append() {
        let store = in_memory_store();
        store.init().await.unwrap();

        store
            .confirm(ConfirmArgs::new("btcusdt", "1H", Side::Long))
            .await
            .unwrap();
        store
            .confirm(ConfirmArgs::new("BTCUSDT", "1h", Side::Short))
            .await
            .unwrap();

        let live = store.live("BTCUSDT", "1h").await.unwrap();
        assert_eq!(live.len(), 2);
        // symbol upper-cased, timeframe lower-cased on write
        assert!(live.iter().all(|c| c.symbol == "BTCUSDT" && c.timeframe == "1h"));
    }

    #[tokio::test]
    async fn named_confirmation_overwrites_in_place() {
        let store = in_memory_store();
        store.init().await.unwrap();

        store
            .confirm(ConfirmArgs::new("ETHUSDT", "1h", Side::Long).with_name("SSL Cross Alert"))
            .await
            .unwrap();
        store
            .confirm(ConfirmArgs::new("ETHUSDT", "1h", Side::Short).with_name("SSL Cross Alert"))
            .await
            .unwrap();

        let live = store.live("ETHUSDT", "1h").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].direction, Side::Short);
        assert_eq!(live[0].name.as_deref(), Some("SSL Cross Alert"));
    }

    #[tokio::test]
    async fn named_overwrite_can_move_timeframes() {
        let store = in_memory_store();
        store.init().await.unwrap();

        store
            .confirm(ConfirmArgs::new("OPUSDT", "15m", Side::Long).with_name("pivot"))
            .await
            .unwrap();
        store
            .confirm(ConfirmArgs::new("OPUSDT", "1h", Side::Long).with_name("pivot"))
            .await
            .unwrap();

        assert!(store.live("OPUSDT", "15m").await.unwrap().is_empty());
        assert_eq!(store.live("OPUSDT", "1h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_timeframe_is_rejected() {
        let store = in_memory_store();
        store.init().await.unwrap();
        let err = store
            .confirm(ConfirmArgs::new("BTCUSDT", "nonsense", Side::Long))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
    }

    #[tokio::test]
    async fn ttl_is_twice_the_timeframe() {
        let store = in_memory_store();
        store.init().await.unwrap();
        let row = store
            .confirm(ConfirmArgs::new("BTCUSDT", "30m", Side::Long))
            .await
            .unwrap();
        let ttl = row.expires_at - row.created_at;
        assert_eq!(ttl.num_minutes(), 60);
    }
}
