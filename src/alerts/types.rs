use crate::errors::BotError;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Closed set of signal types accepted from the charting tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    // Smart-vol family
    SmartOpen,
    SmartVolAdd,
    SmartClose,
    SmartBigClose,
    SmartBigAdd,
    SmartVolumeOpen,
    BullishVolume,
    VolumeUp,
    FixedShortSynchronization,
    LiveShortSynchronization,
    // Trend-pivot family
    LongTrend,
    ShortTrend,
    LongPivotPoint,
    ShortPivotPoint,
    StrongLongPivotPoint,
    StrongShortPivotPoint,
    // Domination family
    BuyerDomination,
    SellerDomination,
    BuyerContinuation,
    SellerContinuation,
    // Candle-pattern ("three alerts") family
    BullRelsi,
    BearRelsi,
    BullMarubozu,
    BearMarubozu,
    BullEngulfing,
    BearEngulfing,
}

/// Which bot population an alert fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFamily {
    SmartVol,
    TrendPivot,
    Domination,
    ThreeAlerts,
}

impl AlertKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "SmartOpen" => AlertKind::SmartOpen,
            "SmartVolAdd" => AlertKind::SmartVolAdd,
            "SmartClose" => AlertKind::SmartClose,
            "SmartBigClose" => AlertKind::SmartBigClose,
            "SmartBigAdd" => AlertKind::SmartBigAdd,
            "SmartVolumeOpen" => AlertKind::SmartVolumeOpen,
            "BullishVolume" => AlertKind::BullishVolume,
            "VolumeUp" => AlertKind::VolumeUp,
            "FixedShortSynchronization" => AlertKind::FixedShortSynchronization,
            "LiveShortSynchronization" => AlertKind::LiveShortSynchronization,
            "LongTrend" => AlertKind::LongTrend,
            "ShortTrend" => AlertKind::ShortTrend,
            "LongPivotPoint" => AlertKind::LongPivotPoint,
            "ShortPivotPoint" => AlertKind::ShortPivotPoint,
            "StrongLongPivotPoint" => AlertKind::StrongLongPivotPoint,
            "StrongShortPivotPoint" => AlertKind::StrongShortPivotPoint,
            "BuyerDomination" => AlertKind::BuyerDomination,
            "SellerDomination" => AlertKind::SellerDomination,
            "BuyerContinuation" => AlertKind::BuyerContinuation,
            "SellerContinuation" => AlertKind::SellerContinuation,
            "BullRelsi" => AlertKind::BullRelsi,
            "BearRelsi" => AlertKind::BearRelsi,
            "BullMarubozu" => AlertKind::BullMarubozu,
            "BearMarubozu" => AlertKind::BearMarubozu,
            "BullEngulfing" => AlertKind::BullEngulfing,
            "BearEngulfing" => AlertKind::BearEngulfing,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertKind::SmartOpen => "SmartOpen",
            AlertKind::SmartVolAdd => "SmartVolAdd",
            AlertKind::SmartClose => "SmartClose",
            AlertKind::SmartBigClose => "SmartBigClose",
            AlertKind::SmartBigAdd => "SmartBigAdd",
            AlertKind::SmartVolumeOpen => "SmartVolumeOpen",
            AlertKind::BullishVolume => "BullishVolume",
            AlertKind::VolumeUp => "VolumeUp",
            AlertKind::FixedShortSynchronization => "FixedShortSynchronization",
            AlertKind::LiveShortSynchronization => "LiveShortSynchronization",
            AlertKind::LongTrend => "LongTrend",
            AlertKind::ShortTrend => "ShortTrend",
            AlertKind::LongPivotPoint => "LongPivotPoint",
            AlertKind::ShortPivotPoint => "ShortPivotPoint",
            AlertKind::StrongLongPivotPoint => "StrongLongPivotPoint",
            AlertKind::StrongShortPivotPoint => "StrongShortPivotPoint",
            AlertKind::BuyerDomination => "BuyerDomination",
            AlertKind::SellerDomination => "SellerDomination",
            AlertKind::BuyerContinuation => "BuyerContinuation",
            AlertKind::SellerContinuation => "SellerContinuation",
            AlertKind::BullRelsi => "BullRelsi",
            AlertKind::BearRelsi => "BearRelsi",
            AlertKind::BullMarubozu => "BullMarubozu",
            AlertKind::BearMarubozu => "BearMarubozu",
            AlertKind::BullEngulfing => "BullEngulfing",
            AlertKind::BearEngulfing => "BearEngulfing",
        }
    }

    pub fn family(&self) -> AlertFamily {
        match self {
            AlertKind::SmartOpen
            | AlertKind::SmartVolAdd
            | AlertKind::SmartClose
            | AlertKind::SmartBigClose
            | AlertKind::SmartBigAdd
            | AlertKind::SmartVolumeOpen
            | AlertKind::BullishVolume
            | AlertKind::VolumeUp
            | AlertKind::FixedShortSynchronization
            | AlertKind::LiveShortSynchronization => AlertFamily::SmartVol,
            AlertKind::LongTrend
            | AlertKind::ShortTrend
            | AlertKind::LongPivotPoint
            | AlertKind::ShortPivotPoint
            | AlertKind::StrongLongPivotPoint
            | AlertKind::StrongShortPivotPoint => AlertFamily::TrendPivot,
            AlertKind::BuyerDomination
            | AlertKind::SellerDomination
            | AlertKind::BuyerContinuation
            | AlertKind::SellerContinuation => AlertFamily::Domination,
            AlertKind::BullRelsi
            | AlertKind::BearRelsi
            | AlertKind::BullMarubozu
            | AlertKind::BearMarubozu
            | AlertKind::BullEngulfing
            | AlertKind::BearEngulfing => AlertFamily::ThreeAlerts,
        }
    }
}

/// A classified, validated trading signal.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: String,
    pub price: Decimal,
    pub timeframe: Option<String>,
    /// Present only on VolumeUp alerts.
    pub volume: Option<f64>,
}

impl Alert {
    /// Classify and validate a raw webhook payload.
    pub fn from_payload(payload: &Value) -> Result<Self, BotError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| BotError::validation("payload must be a JSON object"))?;

        let name = obj
            .get("alertName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BotError::validation("alertName is required"))?;

        let kind = AlertKind::from_name(name)
            .ok_or_else(|| BotError::validation(format!("unknown alert type: {}", name)))?;

        let symbol = obj
            .get("symbol")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BotError::validation("symbol and price are required"))?
            .to_string();

        let price = match obj.get("price") {
            Some(Value::String(s)) => Decimal::from_str(s)
                .map_err(|_| BotError::validation(format!("unparseable price: {}", s)))?,
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
                .map_err(|_| BotError::validation(format!("unparseable price: {}", n)))?,
            _ => return Err(BotError::validation("symbol and price are required")),
        };

        let timeframe = obj
            .get("timeframe")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let volume = obj.get("volume").and_then(|v| v.as_f64());

        if kind == AlertKind::VolumeUp {
            if volume.is_none() {
                return Err(BotError::validation("volume is required for VolumeUp alerts"));
            }
            if timeframe.is_none() {
                return Err(BotError::validation(
                    "timeframe is required for VolumeUp alerts",
                ));
            }
        }

        Ok(Alert {
            kind,
            symbol,
            price,
            timeframe,
            volume,
        })
    }

    /// Timeframe with a per-signal default applied.
    pub fn timeframe_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.timeframe.as_deref().unwrap_or(default)
    }
}
