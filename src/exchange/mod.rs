pub mod bitget;

pub use bitget::BitgetGateway;

use crate::errors::BotError;
use crate::types::{OrderSide, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Order placement surface of the perpetual-futures exchange.
///
/// `flash_close` reports the exchange's "no open position" failure as an
/// error that satisfies [`BotError::is_position_already_closed`]; callers
/// treat that condition as a successful idempotent close.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn is_allowed(&self, symbol_id: &str) -> bool;

    async fn ensure_leverage(&self, symbol_id: &str, leverage: u32) -> Result<(), BotError>;

    /// Contract quantity (as the exchange wants it formatted) worth
    /// `usd_amount` at `last_price`.
    async fn calc_size_from_usd(
        &self,
        symbol_id: &str,
        last_price: Decimal,
        usd_amount: Decimal,
    ) -> Result<String, BotError>;

    async fn place_market(
        &self,
        symbol_id: &str,
        side: OrderSide,
        size: &str,
        client_oid: Option<&str>,
    ) -> Result<(), BotError>;

    /// Market-close an open position, optionally only one side of a hedge.
    /// A `partial_size` reduces the position by that quantity instead of
    /// flattening it.
    async fn flash_close(
        &self,
        symbol: &str,
        hold_side: Option<Side>,
        partial_size: Option<&str>,
    ) -> Result<(), BotError>;
}

/// Gateway for bots that are not in production: accepts everything and
/// touches nothing.
#[derive(Default)]
pub struct NoopExchange;

#[async_trait]
impl ExchangeGateway for NoopExchange {
    fn is_allowed(&self, _symbol_id: &str) -> bool {
        true
    }

    async fn ensure_leverage(&self, _symbol_id: &str, _leverage: u32) -> Result<(), BotError> {
        Ok(())
    }

    async fn calc_size_from_usd(
        &self,
        _symbol_id: &str,
        _last_price: Decimal,
        _usd_amount: Decimal,
    ) -> Result<String, BotError> {
        Ok("0".to_string())
    }

    async fn place_market(
        &self,
        _symbol_id: &str,
        _side: OrderSide,
        _size: &str,
        _client_oid: Option<&str>,
    ) -> Result<(), BotError> {
        Ok(())
    }

    async fn flash_close(
        &self,
        _symbol: &str,
        _hold_side: Option<Side>,
        _partial_size: Option<&str>,
    ) -> Result<(), BotError> {
        Ok(())
    }
}
