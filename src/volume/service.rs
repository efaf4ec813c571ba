use crate::logger::{self, LogTag};
use crate::shutdown;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Readings and close-wait states go stale after two minutes of inertness;
/// read paths treat stale entries as absent and evict them.
const DATA_TTL_SECS: i64 = 120;

/// A cached close-wait state allows closing once the volume reaches this.
pub const CLOSE_VOLUME_THRESHOLD: f64 = 19.0;

/// Most recent volume reading for a (symbol, timeframe) pair.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeUpData {
    pub symbol: String,
    pub timeframe: String,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Armed "waiting to close" state for a (symbol, bot) pair.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeUpCloseState {
    pub symbol: String,
    pub bot_name: String,
    pub initial_volume: f64,
    pub current_volume: f64,
    pub timestamp: DateTime<Utc>,
    pub waiting_for_close: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeUpStats {
    pub total: usize,
    pub active: usize,
    pub symbols: usize,
    pub timeframes: usize,
    pub close_states: usize,
}

/// In-memory, TTL-bounded cache of volume readings and close-wait gates.
/// Lost on restart by design; it only affects in-flight multi-step
/// sequences, never persisted rows or exchange-side positions.
#[derive(Default)]
pub struct VolumeUpService {
    volume_data: RwLock<HashMap<(String, String), VolumeUpData>>,
    close_states: RwLock<HashMap<(String, String), VolumeUpCloseState>>,
}

fn is_fresh(timestamp: DateTime<Utc>) -> bool {
    Utc::now() - timestamp <= Duration::seconds(DATA_TTL_SECS)
}

impl VolumeUpService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a reading and refresh every armed close-wait state for the symbol.
    pub async fn save_volume_up(&self, symbol: &str, timeframe: &str, volume: f64) {
        logger::debug(
            LogTag::Volume,
            &format!("Caching volume for {} ({}): {}", symbol, timeframe, volume),
        );
        let mut data = self.volume_data.write().await;
        data.insert(
            (symbol.to_string(), timeframe.to_string()),
            VolumeUpData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                volume,
                timestamp: Utc::now(),
            },
        );
        drop(data);

        let mut states = self.close_states.write().await;
        for state in states.values_mut() {
            if state.symbol == symbol && state.waiting_for_close {
                logger::debug(
                    LogTag::Volume,
                    &format!(
                        "Close-wait volume for {} ({}): {} -> {}",
                        symbol, state.bot_name, state.current_volume, volume
                    ),
                );
                state.current_volume = volume;
                state.timestamp = Utc::now();
            }
        }
    }

    /// Arm the close-wait gate on the first close signal.
    pub async fn init_close_state(&self, symbol: &str, bot_name: &str, initial_volume: f64) {
        logger::debug(
            LogTag::Volume,
            &format!(
                "Arming close-wait for {} ({}) at volume {}",
                symbol, bot_name, initial_volume
            ),
        );
        let mut states = self.close_states.write().await;
        states.insert(
            (symbol.to_string(), bot_name.to_string()),
            VolumeUpCloseState {
                symbol: symbol.to_string(),
                bot_name: bot_name.to_string(),
                initial_volume,
                current_volume: initial_volume,
                timestamp: Utc::now(),
                waiting_for_close: true,
            },
        );
    }

    /// The armed gate opens once the cached volume reaches the threshold
    /// within the freshness window. Stale states are evicted here.
    pub async fn can_close_position(&self, symbol: &str, bot_name: &str) -> bool {
        let key = (symbol.to_string(), bot_name.to_string());
        let mut states = self.close_states.write().await;
        match states.get(&key) {
            Some(state) if state.waiting_for_close => {
                if !is_fresh(state.timestamp) {
                    logger::debug(
                        LogTag::Volume,
                        &format!("Close-wait for {} ({}) went stale, evicting", symbol, bot_name),
                    );
                    states.remove(&key);
                    return false;
                }
                state.current_volume >= CLOSE_VOLUME_THRESHOLD
            }
            _ => false,
        }
    }

    pub async fn get_close_state(&self, symbol: &str, bot_name: &str) -> Option<VolumeUpCloseState> {
        let key = (symbol.to_string(), bot_name.to_string());
        let mut states = self.close_states.write().await;
        match states.get(&key) {
            Some(state) if state.waiting_for_close => {
                if !is_fresh(state.timestamp) {
                    states.remove(&key);
                    return None;
                }
                Some(state.clone())
            }
            _ => None,
        }
    }

    /// Clear the gate once a position is actually closed.
    pub async fn mark_position_closed(&self, symbol: &str, bot_name: &str) {
        let mut states = self.close_states.write().await;
        if states
            .remove(&(symbol.to_string(), bot_name.to_string()))
            .is_some()
        {
            logger::debug(
                LogTag::Volume,
                &format!("Cleared close-wait for {} ({})", symbol, bot_name),
            );
        }
    }

    pub async fn get_volume_up(&self, symbol: &str, timeframe: &str) -> Option<VolumeUpData> {
        let key = (symbol.to_string(), timeframe.to_string());
        let mut data = self.volume_data.write().await;
        match data.get(&key) {
            Some(entry) if is_fresh(entry.timestamp) => Some(entry.clone()),
            Some(_) => {
                data.remove(&key);
                None
            }
            None => None,
        }
    }

    pub async fn get_volume_up_by_symbol(&self, symbol: &str) -> Vec<VolumeUpData> {
        let mut data = self.volume_data.write().await;
        data.retain(|_, entry| is_fresh(entry.timestamp));
        data.values()
            .filter(|entry| entry.symbol == symbol)
            .cloned()
            .collect()
    }

    pub async fn all_active(&self) -> Vec<VolumeUpData> {
        let mut data = self.volume_data.write().await;
        data.retain(|_, entry| is_fresh(entry.timestamp));
        data.values().cloned().collect()
    }

    pub async fn all_close_states(&self) -> Vec<VolumeUpCloseState> {
        let mut states = self.close_states.write().await;
        states.retain(|_, state| is_fresh(state.timestamp));
        states.values().cloned().collect()
    }

    pub async fn clear_all(&self) {
        self.volume_data.write().await.clear();
        self.close_states.write().await.clear();
    }

    pub async fn stats(&self) -> VolumeUpStats {
        let total = self.volume_data.read().await.len();
        let active = self.all_active().await;
        let close_states = self.all_close_states().await.len();
        let symbols = active
            .iter()
            .map(|d| d.symbol.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let timeframes = active
            .iter()
            .map(|d| d.timeframe.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        VolumeUpStats {
            total,
            active: active.len(),
            symbols,
            timeframes,
            close_states,
        }
    }

    /// Periodic eviction so idle maps do not accumulate dead entries.
    pub fn spawn_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let notify = shutdown::shutdown_notify();
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            interval.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if shutdown::is_shutting_down() {
                            break;
                        }
                        let _ = self.all_active().await;
                        let _ = self.all_close_states().await;
                    }
                    _ = notify.notified() => break,
                }
            }
            logger::debug(LogTag::Volume, "Volume cleanup task stopped");
        });
    }
}
