use crate::types::Side;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// One persisted directional vote for a (symbol, timeframe) pair.
///
/// Rows expire at `expires_at` (two bar durations after creation); expired
/// rows never participate in voting. Multiple live rows per pair may
/// coexist unless they carry the same `name` identity, in which case the
/// newest overwrites the older one in place.
#[derive(Debug, Clone)]
pub struct TrendConfirmation {
    pub id: i64,
    pub symbol: String,
    pub timeframe: String,
    pub direction: Side,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: Option<String>,
    /// Named-alert identity extracted from `meta.name`.
    pub name: Option<String>,
    pub meta: Option<Value>,
}

/// Arguments for recording a confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmArgs {
    pub symbol: String,
    pub timeframe: String,
    pub direction: Side,
    pub source: Option<String>,
    pub meta: Option<Value>,
}

impl ConfirmArgs {
    pub fn new(symbol: &str, timeframe: &str, direction: Side) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            direction,
            source: None,
            meta: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Attach a named identity: a later confirmation with the same
    /// (symbol, name) replaces this one instead of adding a vote.
    pub fn with_name(mut self, name: &str) -> Self {
        let mut meta = match self.meta.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        meta.insert("name".to_string(), Value::String(name.to_string()));
        self.meta = Some(Value::Object(meta));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
    }
}
