//! Telegram notification adapter.
//!
//! A notification outage must never block trading logic: send failures are
//! logged at this boundary and not propagated.

use crate::config::TelegramChannelConfig;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

/// Outbound notification channel of one bot.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Sends messages to one configured Telegram chat.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
    channel: String,
}

impl TelegramNotifier {
    pub fn new(channel: &str, config: &TelegramChannelConfig) -> Result<Self, String> {
        if config.token.is_empty() {
            return Err(format!("telegram channel {}: token is empty", channel));
        }
        if !config.token.contains(':') {
            return Err(format!(
                "telegram channel {}: token must contain ':'",
                channel
            ));
        }
        if !config.chat_id.starts_with('-') && !config.chat_id.starts_with('@') {
            return Err(format!(
                "telegram channel {}: chat id must start with '-' or '@'",
                channel
            ));
        }
        let chat_id: i64 = config
            .chat_id
            .parse()
            .map_err(|e| format!("telegram channel {}: invalid chat id: {}", channel, e))?;

        Ok(Self {
            bot: Bot::new(config.token.as_str()),
            chat_id: ChatId(chat_id),
            channel: channel.to_string(),
        })
    }

    /// Live connectivity probe (getMe); used by the test endpoint.
    pub async fn test_connection(&self) -> bool {
        match self.bot.get_me().send().await {
            Ok(me) => {
                logger::info(
                    LogTag::Telegram,
                    &format!(
                        "Telegram connection ok for {}: @{}",
                        self.channel,
                        me.user.username.as_deref().unwrap_or("unknown")
                    ),
                );
                true
            }
            Err(e) => {
                logger::error(
                    LogTag::Telegram,
                    &format!("Telegram connection failed for {}: {}", self.channel, e),
                );
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        match self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .send()
            .await
        {
            Ok(_) => {
                logger::debug(
                    LogTag::Telegram,
                    &format!("Sent via {} (length={})", self.channel, text.len()),
                );
            }
            Err(e) => {
                logger::error(
                    LogTag::Telegram,
                    &format!("Send failed via {}: {}", self.channel, e),
                );
            }
        }
    }
}
