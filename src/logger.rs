//! Tagged console logging.
//!
//! Level functions take a [`LogTag`] identifying the subsystem; debug
//! output is gated per tag via `--debug <tag>` CLI flags (or `--verbose`
//! for everything). Errors and warnings are always shown.

use chrono::Utc;
use colored::Colorize;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Alerts,
    Bots,
    Strategy,
    Trend,
    Positions,
    Volume,
    Exchange,
    Telegram,
    Scheduler,
    Webserver,
}

impl LogTag {
    pub fn label(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Alerts => "ALERTS",
            LogTag::Bots => "BOTS",
            LogTag::Strategy => "STRATEGY",
            LogTag::Trend => "TREND",
            LogTag::Positions => "POSITIONS",
            LogTag::Volume => "VOLUME",
            LogTag::Exchange => "EXCHANGE",
            LogTag::Telegram => "TELEGRAM",
            LogTag::Scheduler => "SCHEDULER",
            LogTag::Webserver => "WEBSERVER",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Alerts => "alerts",
            LogTag::Bots => "bots",
            LogTag::Strategy => "strategy",
            LogTag::Trend => "trend",
            LogTag::Positions => "positions",
            LogTag::Volume => "volume",
            LogTag::Exchange => "exchange",
            LogTag::Telegram => "telegram",
            LogTag::Scheduler => "scheduler",
            LogTag::Webserver => "webserver",
        }
    }
}

struct LoggerConfig {
    debug_tags: HashSet<String>,
    verbose: bool,
}

static CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| {
    RwLock::new(LoggerConfig {
        debug_tags: HashSet::new(),
        verbose: false,
    })
});

/// Configure debug gating. Call once at startup before spawning services.
pub fn init(debug_tags: &[String], verbose: bool) {
    if let Ok(mut cfg) = CONFIG.write() {
        cfg.debug_tags = debug_tags.iter().map(|t| t.to_lowercase()).collect();
        cfg.verbose = verbose;
    }
}

pub fn is_debug_enabled(tag: LogTag) -> bool {
    match CONFIG.read() {
        Ok(cfg) => cfg.verbose || cfg.debug_tags.contains(tag.flag()),
        Err(_) => false,
    }
}

fn timestamp() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn emit(icon: colored::ColoredString, tag: LogTag, message: &str) {
    println!(
        "{} {} {} {}",
        icon,
        tag.label().bold(),
        format!("[{}]", timestamp()).dimmed(),
        message
    );
}

/// Always shown; critical failures.
pub fn error(tag: LogTag, message: &str) {
    emit("✗".red().bold(), tag, &message.red().to_string());
}

/// Always shown; issues that need attention but are not critical.
pub fn warning(tag: LogTag, message: &str) {
    emit("!".yellow().bold(), tag, &message.yellow().to_string());
}

/// Standard operational events.
pub fn info(tag: LogTag, message: &str) {
    emit("·".blue().bold(), tag, message);
}

/// Only shown with `--debug <tag>` or `--verbose`.
pub fn debug(tag: LogTag, message: &str) {
    if is_debug_enabled(tag) {
        emit("»".purple().bold(), tag, &message.dimmed().to_string());
    }
}
