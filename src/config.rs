use crate::types::Direction;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub telegram: HashMap<String, TelegramChannelConfig>,
    pub exchange: HashMap<String, ExchangeProfileConfig>,
    pub bots: Vec<BotConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "alertbot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    pub token: String,
    pub chat_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeProfileConfig {
    pub base_url: String,
    pub key: String,
    pub secret: String,
    pub passphrase: String,
    #[serde(default = "default_product_type")]
    pub product_type: String,
    #[serde(default = "default_margin_coin")]
    pub margin_coin: String,
    /// Comma-separated list of tradable contract ids; empty allows none.
    #[serde(default)]
    pub allowed_csv: String,
}

fn default_product_type() -> String {
    "umcbl".to_string()
}

fn default_margin_coin() -> String {
    "USDT".to_string()
}

/// Position sizing for the smart-vol strategy family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    pub base_usd: Decimal,
    pub add_fraction: Decimal,
    pub leverage: u32,
}

/// One trading bot. Immutable after load; one engine per enabled entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    pub enabled: bool,
    /// Strategy tag; `None` selects the default smart-vol strategy.
    #[serde(default)]
    pub strategy: Option<String>,
    /// Production bots talk to the real exchange; others get the no-op gateway.
    #[serde(default)]
    pub prod: bool,
    /// Whether the default strategy gates opens/adds/closes on trend checks.
    #[serde(default)]
    pub is_trended: bool,
    pub direction: Direction,
    /// Ordered timeframes; the highest-priority one is the "main" timeframe
    /// for hierarchy logic.
    pub timeframe_trend: Vec<String>,
    /// Empty means all symbols.
    #[serde(default)]
    pub symbol_filter: Vec<String>,
    #[serde(default)]
    pub scheduled_notification: bool,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    pub exchange_profile: String,
    pub telegram_channel: String,
    #[serde(default)]
    pub sizing: Option<SizingConfig>,
    #[serde(default)]
    pub max_fills: Option<u32>,
    /// Opt-in: route close signals through the volume-up ≥19 gate.
    #[serde(default)]
    pub volume_close_gate: bool,
}

impl BotConfig {
    /// Fills ceiling with the strategy-family default of 4.
    pub fn max_fills(&self) -> u32 {
        self.max_fills.unwrap_or(4)
    }

    pub fn strategy_tag(&self) -> &str {
        self.strategy.as_deref().unwrap_or("default")
    }

    pub fn symbol_allowed(&self, symbol: &str) -> bool {
        self.symbol_filter.is_empty() || self.symbol_filter.iter().any(|s| s == symbol)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let default_config = Self::default();
            default_config.save(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path))?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut telegram = HashMap::new();
        telegram.insert(
            "bot1".to_string(),
            TelegramChannelConfig {
                token: String::new(),
                chat_id: String::new(),
                name: "SmartVol Bot 1".to_string(),
            },
        );

        let mut exchange = HashMap::new();
        exchange.insert(
            "BITGET".to_string(),
            ExchangeProfileConfig {
                base_url: "https://api.bitget.com".to_string(),
                key: String::new(),
                secret: String::new(),
                passphrase: String::new(),
                product_type: default_product_type(),
                margin_coin: default_margin_coin(),
                allowed_csv: "ETHUSDT_UMCBL,LINKUSDT_UMCBL,LTCUSDT_UMCBL".to_string(),
            },
        );

        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            telegram,
            exchange,
            bots: vec![BotConfig {
                name: "SmartVolListener".to_string(),
                enabled: false,
                strategy: None,
                prod: false,
                is_trended: true,
                direction: Direction::Long,
                timeframe_trend: vec!["1h".to_string(), "1m".to_string()],
                symbol_filter: vec![],
                scheduled_notification: true,
                scheduled_time: Some("1h".to_string()),
                exchange_profile: "BITGET".to_string(),
                telegram_channel: "bot1".to_string(),
                sizing: Some(SizingConfig {
                    base_usd: Decimal::new(200, 0),
                    add_fraction: Decimal::new(5, 1),
                    leverage: 15,
                }),
                max_fills: Some(4),
                volume_close_gate: false,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_bot_entry() {
        let raw = r#"{
            "telegram": { "bot1": { "token": "t", "chat_id": "-100" } },
            "exchange": { "BITGET": {
                "base_url": "https://api.bitget.com",
                "key": "k", "secret": "s", "passphrase": "p"
            } },
            "bots": [{
                "name": "TestBot",
                "enabled": true,
                "direction": "long",
                "timeframe_trend": ["1h", "1m"],
                "exchange_profile": "BITGET",
                "telegram_channel": "bot1",
                "sizing": { "base_usd": 200, "add_fraction": 0.5, "leverage": 15 }
            }]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        let bot = &config.bots[0];
        assert_eq!(bot.name, "TestBot");
        assert_eq!(bot.max_fills(), 4);
        assert_eq!(bot.strategy_tag(), "default");
        assert!(bot.symbol_allowed("BTCUSDT"));
        let sizing = bot.sizing.as_ref().unwrap();
        assert_eq!(sizing.base_usd, Decimal::new(200, 0));
        assert_eq!(sizing.add_fraction, Decimal::new(5, 1));
    }

    #[test]
    fn symbol_filter_restricts_when_present() {
        let mut bot = Config::default().bots.remove(0);
        bot.symbol_filter = vec!["ETHUSDT".to_string()];
        assert!(bot.symbol_allowed("ETHUSDT"));
        assert!(!bot.symbol_allowed("BTCUSDT"));
    }
}
