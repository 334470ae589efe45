//! Exchange connector capability consumed by the order executor
//!
//! Anything that can take orders (a real venue client, the in-memory paper
//! exchange, a test double) implements [`ExchangeConnector`]. The executor
//! owns an `Arc<dyn ExchangeConnector>`; nothing reaches for a global handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{OrderSide, Symbol};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("exchange error: {0}")]
    Exchange(String),
}

/// Execution style of a single order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit { price: f64 },
    StopMarket { stop_price: f64 },
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::Limit { price } => write!(f, "limit@{}", price),
            OrderKind::StopMarket { stop_price } => write!(f, "stop_market@{}", stop_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: f64,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn new(symbol: Symbol, side: OrderSide, quantity: f64, kind: OrderKind) -> Self {
        OrderRequest {
            symbol,
            side,
            quantity,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub status: OrderStatus,
    /// Average fill price when the exchange reports one
    pub fill_price: Option<f64>,
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Venue name for logs
    fn name(&self) -> &str;

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, ExchangeError>;

    /// Submit an order that may only shrink an existing position
    async fn submit_reduce_only_order(&self, request: &OrderRequest) -> Result<OrderHandle, ExchangeError>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError>;

    async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderStatus, ExchangeError>;
}
