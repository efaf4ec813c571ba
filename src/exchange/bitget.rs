//! Signing REST client for the Bitget UMCBL perpetual-futures API.
//!
//! Only the slice of the API the strategies need: leverage, contract
//! metadata for sizing, market orders and flash close.

use crate::config::ExchangeProfileConfig;
use crate::errors::BotError;
use crate::exchange::ExchangeGateway;
use crate::logger::{self, LogTag};
use crate::types::{OrderSide, Side};
use crate::utils::{to_exchange_symbol_id, to_v2_symbol};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tokio::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

const CONTRACT_CACHE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone)]
struct ContractInfo {
    volume_place: u32,
    size_multiplier: Decimal,
    min_trade_num: Decimal,
    fetched_at: chrono::DateTime<chrono::Utc>,
}

pub struct BitgetGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
    product_type: String,
    margin_coin: String,
    allowed: HashSet<String>,
    contracts: Mutex<HashMap<String, ContractInfo>>,
}

impl BitgetGateway {
    pub fn new(profile: &ExchangeProfileConfig) -> Self {
        let allowed = profile
            .allowed_csv
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            http: reqwest::Client::new(),
            base_url: profile.base_url.trim_end_matches('/').to_string(),
            api_key: profile.key.clone(),
            api_secret: profile.secret.clone(),
            passphrase: profile.passphrase.clone(),
            product_type: profile.product_type.clone(),
            margin_coin: profile.margin_coin.clone(),
            allowed,
            contracts: Mutex::new(HashMap::new()),
        }
    }

    /// ACCESS-SIGN: base64(hmac-sha256(timestamp + method + path + query + body)).
    fn sign(&self, timestamp: &str, method: &str, path_with_query: &str, body: &str) -> String {
        let prehash = format!("{}{}{}{}", timestamp, method, path_with_query, body);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(prehash.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, BotError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let path_with_query = match query {
            Some(q) if !q.is_empty() => format!("{}?{}", path, q),
            _ => path.to_string(),
        };
        let body_string = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = self.sign(&timestamp, method, &path_with_query, &body_string);
        let url = format!("{}{}", self.base_url, path_with_query);

        let mut request = match method {
            "POST" => self.http.post(&url).body(body_string.clone()),
            _ => self.http.get(&url),
        };
        request = request
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("ACCESS-TIMESTAMP", &timestamp)
            .header("locale", "en-US")
            .header("Content-Type", "application/json");

        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        let code = payload.get("code").and_then(|c| c.as_str()).unwrap_or("");
        if !status.is_success() || (!code.is_empty() && code != "00000") {
            let message = payload
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("request failed")
                .to_string();
            return Err(BotError::exchange(
                if code.is_empty() { None } else { Some(code.to_string()) },
                format!("{} {} -> {}", method, path, message),
            ));
        }
        Ok(payload)
    }

    async fn load_contract(&self, symbol_id: &str) -> Result<ContractInfo, BotError> {
        {
            let contracts = self.contracts.lock().await;
            if let Some(info) = contracts.get(symbol_id) {
                let age = Utc::now() - info.fetched_at;
                if age.num_seconds() < CONTRACT_CACHE_TTL_SECS {
                    return Ok(info.clone());
                }
            }
        }

        let query = format!("productType={}", self.product_type);
        let payload = self
            .call("GET", "/api/mix/v1/market/contracts", Some(&query), None)
            .await?;
        let rows = payload
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        let row = rows
            .iter()
            .find(|r| r.get("symbol").and_then(|s| s.as_str()) == Some(symbol_id))
            .ok_or_else(|| {
                BotError::exchange(None, format!("contract config not found for {}", symbol_id))
            })?;

        let info = ContractInfo {
            volume_place: field_u32(row, "volumePlace"),
            size_multiplier: field_decimal(row, "sizeMultiplier"),
            min_trade_num: field_decimal(row, "minTradeNum"),
            fetched_at: Utc::now(),
        };
        self.contracts
            .lock()
            .await
            .insert(symbol_id.to_string(), info.clone());
        Ok(info)
    }
}

fn field_u32(row: &Value, key: &str) -> u32 {
    row.get(key)
        .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_u64().map(|n| n.to_string())))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn field_decimal(row: &Value, key: &str) -> Decimal {
    row.get(key)
        .and_then(|v| match v {
            Value::String(s) => Decimal::from_str(s).ok(),
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        })
        .unwrap_or_default()
}

/// Floor a raw quantity to the contract's step size.
fn floor_to_step(raw: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return raw;
    }
    (raw / step).floor() * step
}

#[async_trait]
impl ExchangeGateway for BitgetGateway {
    fn is_allowed(&self, symbol_id: &str) -> bool {
        self.allowed.contains(symbol_id)
    }

    async fn ensure_leverage(&self, symbol_id: &str, leverage: u32) -> Result<(), BotError> {
        let body = json!({
            "symbol": symbol_id,
            "marginCoin": self.margin_coin,
            "leverage": leverage.to_string(),
        });
        self.call("POST", "/api/mix/v1/account/setLeverage", None, Some(&body))
            .await?;
        logger::debug(
            LogTag::Exchange,
            &format!("Leverage {}x set for {}", leverage, symbol_id),
        );
        Ok(())
    }

    async fn calc_size_from_usd(
        &self,
        symbol_id: &str,
        last_price: Decimal,
        usd_amount: Decimal,
    ) -> Result<String, BotError> {
        if usd_amount <= Decimal::ZERO {
            return Err(BotError::validation("usd amount must be positive"));
        }
        if last_price <= Decimal::ZERO {
            return Err(BotError::validation("last price must be positive"));
        }
        let info = self.load_contract(symbol_id).await?;
        let raw = usd_amount / last_price;
        let step = if info.size_multiplier > Decimal::ZERO {
            info.size_multiplier
        } else {
            Decimal::new(1, info.volume_place)
        };
        let floored = floor_to_step(raw, step);
        let sized = floored.max(info.min_trade_num).round_dp(info.volume_place);
        Ok(sized.normalize().to_string())
    }

    async fn place_market(
        &self,
        symbol_id: &str,
        side: OrderSide,
        size: &str,
        client_oid: Option<&str>,
    ) -> Result<(), BotError> {
        let order_side = match side {
            OrderSide::Buy => "open_long",
            OrderSide::Sell => "close_long",
        };
        let mut body = json!({
            "symbol": symbol_id,
            "marginCoin": self.margin_coin,
            "size": size,
            "side": order_side,
            "orderType": "market",
        });
        if let Some(oid) = client_oid {
            body["clientOid"] = Value::String(oid.to_string());
        }
        self.call("POST", "/api/mix/v1/order/placeOrder", None, Some(&body))
            .await?;
        logger::info(
            LogTag::Exchange,
            &format!("Market {} {} size {}", side.as_str(), symbol_id, size),
        );
        Ok(())
    }

    async fn flash_close(
        &self,
        symbol: &str,
        hold_side: Option<Side>,
        partial_size: Option<&str>,
    ) -> Result<(), BotError> {
        let symbol_id = to_exchange_symbol_id(symbol);
        if !self.is_allowed(&symbol_id) {
            logger::warning(
                LogTag::Exchange,
                &format!("flash close skipped, symbol not allowed: {}", symbol_id),
            );
            return Ok(());
        }

        // a sized close is a reduce-only market order, not a flatten
        if let Some(size) = partial_size {
            let close_side = match hold_side {
                Some(Side::Short) => "close_short",
                _ => "close_long",
            };
            let body = json!({
                "symbol": symbol_id,
                "marginCoin": self.margin_coin,
                "size": size,
                "side": close_side,
                "orderType": "market",
            });
            self.call("POST", "/api/mix/v1/order/placeOrder", None, Some(&body))
                .await?;
            logger::info(
                LogTag::Exchange,
                &format!("Reduced {} by {}", symbol, size),
            );
            return Ok(());
        }

        let mut body = json!({
            "symbol": to_v2_symbol(symbol),
            "productType": "USDT-FUTURES",
        });
        if let Some(side) = hold_side {
            body["holdSide"] = Value::String(side.to_string());
        }
        self.call("POST", "/api/v2/mix/order/close-positions", None, Some(&body))
            .await?;
        logger::info(LogTag::Exchange, &format!("Flash closed {}", symbol));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> BitgetGateway {
        BitgetGateway::new(&ExchangeProfileConfig {
            base_url: "https://api.bitget.com".to_string(),
            key: "key".to_string(),
            secret: "secret".to_string(),
            passphrase: "pass".to_string(),
            product_type: "umcbl".to_string(),
            margin_coin: "USDT".to_string(),
            allowed_csv: "ETHUSDT_UMCBL, LINKUSDT_UMCBL".to_string(),
        })
    }

    #[test]
    fn allowed_set_from_csv() {
        let gw = gateway();
        assert!(gw.is_allowed("ETHUSDT_UMCBL"));
        assert!(gw.is_allowed("LINKUSDT_UMCBL"));
        assert!(!gw.is_allowed("BTCUSDT_UMCBL"));
    }

    #[test]
    fn signature_is_deterministic() {
        let gw = gateway();
        let a = gw.sign("1700000000000", "POST", "/api/mix/v1/order/placeOrder", "{}");
        let b = gw.sign("1700000000000", "POST", "/api/mix/v1/order/placeOrder", "{}");
        assert_eq!(a, b);
        let c = gw.sign("1700000000001", "POST", "/api/mix/v1/order/placeOrder", "{}");
        assert_ne!(a, c);
    }

    #[test]
    fn quantity_floors_to_step() {
        let step = Decimal::from_str("0.01").unwrap();
        let raw = Decimal::from_str("1.23999").unwrap();
        assert_eq!(floor_to_step(raw, step), Decimal::from_str("1.23").unwrap());
        // zero step passes through
        assert_eq!(floor_to_step(raw, Decimal::ZERO), raw);
    }
}
