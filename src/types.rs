use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction a bot is allowed to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Both,
}

impl Direction {
    /// The trend value this direction corresponds to, if any.
    ///
    /// `Both` has no single trend equivalent; every strict trend
    /// comparison against it fails, so a `both` bot never passes the
    /// trend-equality gates.
    pub fn as_trend(&self) -> Option<Trend> {
        match self {
            Direction::Long => Some(Trend::Long),
            Direction::Short => Some(Trend::Short),
            Direction::Both => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// Current trend reading for a (symbol, timeframe) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Long,
    Short,
    Neutral,
}

impl Trend {
    pub fn is_neutral(&self) -> bool {
        matches!(self, Trend::Neutral)
    }

    /// Strict equality against a bot direction. `Neutral` matches nothing,
    /// `Both` is matched by nothing.
    pub fn matches(&self, direction: Direction) -> bool {
        direction.as_trend() == Some(*self)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Long => write!(f, "long"),
            Trend::Short => write!(f, "short"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_trend(&self) -> Trend {
        match self {
            Side::Long => Trend::Long,
            Side::Short => Trend::Short,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Market order side as the exchange understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_matches_direction_strictly() {
        assert!(Trend::Long.matches(Direction::Long));
        assert!(Trend::Short.matches(Direction::Short));
        assert!(!Trend::Long.matches(Direction::Short));
        assert!(!Trend::Neutral.matches(Direction::Long));
        // `both` bots never pass a strict trend gate
        assert!(!Trend::Long.matches(Direction::Both));
        assert!(!Trend::Short.matches(Direction::Both));
    }

    #[test]
    fn direction_serde_roundtrip() {
        let d: Direction = serde_json::from_str("\"both\"").unwrap();
        assert_eq!(d, Direction::Both);
        assert_eq!(serde_json::to_string(&Trend::Neutral).unwrap(), "\"neutral\"");
    }
}
