use chrono::{DateTime, Duration, Utc};

/// Normalize an alert symbol to the exchange base form.
///
/// `"OP_USDT"` -> `"OPUSDT"`, `"btcusdt"` -> `"BTCUSDT"`, `"SOL"` -> `"SOLUSDT"`.
pub fn alert_symbol_to_base(sym: &str) -> String {
    let s = sym.trim().to_uppercase();
    if s.ends_with("_USDT") {
        return s.replace("_USDT", "USDT").replace('_', "");
    }
    if s.ends_with("USDT") {
        return s;
    }
    format!("{}USDT", s)
}

/// Full UMCBL contract id used by the mix-v1 endpoints.
pub fn to_exchange_symbol_id(sym: &str) -> String {
    format!("{}_UMCBL", alert_symbol_to_base(sym))
}

/// Plain symbol form used by the v2 endpoints ("OP_USDT" -> "OPUSDT").
pub fn to_v2_symbol(sym: &str) -> String {
    alert_symbol_to_base(sym)
}

/// Minute-equivalent weight of a timeframe: m=1, h=60, d=1440, w=10080.
/// Unparseable timeframes weigh 0 and therefore never win a priority sort.
pub fn timeframe_minutes(timeframe: &str) -> i64 {
    let tf = timeframe.trim();
    let split = tf.len().saturating_sub(1);
    let (digits, unit) = tf.split_at(split);
    let value: i64 = match digits.parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let mult = match unit.to_lowercase().as_str() {
        "m" => 1,
        "h" => 60,
        "d" => 1440,
        "w" => 10080,
        _ => return 0,
    };
    value * mult
}

/// Wall-clock duration of one timeframe bar, if the timeframe parses.
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let minutes = timeframe_minutes(timeframe);
    if minutes <= 0 {
        return None;
    }
    Some(Duration::minutes(minutes))
}

/// Sort timeframes highest-priority first.
pub fn sort_timeframes_by_priority(timeframes: &[String]) -> Vec<String> {
    let mut sorted = timeframes.to_vec();
    sorted.sort_by_key(|tf| std::cmp::Reverse(timeframe_minutes(tf)));
    sorted
}

/// The main (highest-priority) timeframe of a list.
pub fn main_timeframe(timeframes: &[String]) -> Option<String> {
    sort_timeframes_by_priority(timeframes).into_iter().next()
}

/// Parse a scheduler interval like "30s", "5m" or "1h". Falls back to one
/// minute when the string does not parse, so a typo degrades the cadence
/// instead of killing the report job.
pub fn parse_interval(s: &str) -> std::time::Duration {
    let fallback = std::time::Duration::from_secs(60);
    let s = s.trim();
    if s.len() < 2 {
        return fallback;
    }
    let (digits, unit) = s.split_at(s.len() - 1);
    let value: u64 = match digits.parse() {
        Ok(v) => v,
        Err(_) => return fallback,
    };
    match unit.to_lowercase().as_str() {
        "s" => std::time::Duration::from_secs(value),
        "m" => std::time::Duration::from_secs(value * 60),
        "h" => std::time::Duration::from_secs(value * 3600),
        _ => fallback,
    }
}

/// Human-readable duration between two instants, e.g. "3h 12m".
pub fn format_duration(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let total_minutes = (to - from).num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
