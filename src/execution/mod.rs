//! Order execution: turning a sized decision into a bracket order
//!
//! The execution mode is chosen once, at construction:
//! - `Simulate` synthesizes an order id and never touches the connector
//! - `Live` submits the entry, then a reduce-only stop-loss and take-profit
//!
//! Entry submission is the critical path; bracket legs are best effort.
//! A failed leg is logged and the entry stands without it. Connector errors
//! never escape [`OrderExecutor::place_order`]: they come back as
//! [`OrderResult::Failed`].

pub mod connector;
pub mod paper;

pub use connector::{ExchangeConnector, ExchangeError, OrderHandle, OrderKind, OrderRequest, OrderStatus};
pub use paper::{PaperExchange, PaperOrder};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::risk::BracketLevels;
use crate::types::{Side, Symbol};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Simulate,
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Simulate => write!(f, "simulate"),
            ExecutionMode::Live => write!(f, "live"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulate" | "dry_run" | "dry-run" => Ok(ExecutionMode::Simulate),
            "live" => Ok(ExecutionMode::Live),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// How the entry leg is priced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    /// Limit at the entry price
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientFunds,
    InvalidOrder,
    Network,
    Unexpected,
}

impl From<&ExchangeError> for FailureKind {
    fn from(err: &ExchangeError) -> Self {
        match err {
            ExchangeError::InsufficientFunds(_) => FailureKind::InsufficientFunds,
            ExchangeError::InvalidOrder(_) => FailureKind::InvalidOrder,
            ExchangeError::Network(_) => FailureKind::Network,
            ExchangeError::OrderNotFound(_) | ExchangeError::Exchange(_) => FailureKind::Unexpected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub status: OrderStatus,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderResult {
    Placed(PlacedOrder),
    Failed { kind: FailureKind, message: String },
}

impl OrderResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OrderResult::Placed(_))
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            OrderResult::Placed(order) => Some(&order.order_id),
            OrderResult::Failed { .. } => None,
        }
    }
}

pub struct OrderExecutor {
    mode: ExecutionMode,
    order_type: OrderType,
    connector: Arc<dyn ExchangeConnector>,
    sequence: AtomicU64,
}

impl fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("mode", &self.mode)
            .field("order_type", &self.order_type)
            .field("connector", &self.connector.name())
            .finish()
    }
}

impl OrderExecutor {
    pub fn new(mode: ExecutionMode, order_type: OrderType, connector: Arc<dyn ExchangeConnector>) -> Self {
        info!(%mode, ?order_type, venue = connector.name(), "Order executor initialized");
        OrderExecutor {
            mode,
            order_type,
            connector,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Unique within the process even when called twice in one millisecond
    fn simulated_order_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("SIM-{}-{}", Utc::now().timestamp_millis(), seq)
    }

    pub async fn place_order(&self, symbol: &Symbol, levels: &BracketLevels, size: f64) -> OrderResult {
        if !(size > 0.0) || !size.is_finite() {
            error!(size, "Refusing to place order with non-positive size");
            return OrderResult::Failed {
                kind: FailureKind::InvalidOrder,
                message: format!("size must be positive, got {}", size),
            };
        }

        match self.mode {
            ExecutionMode::Simulate => self.place_simulated(symbol, levels, size),
            ExecutionMode::Live => self.place_live(symbol, levels, size).await,
        }
    }

    fn place_simulated(&self, symbol: &Symbol, levels: &BracketLevels, size: f64) -> OrderResult {
        let order_id = self.simulated_order_id();

        info!(
            %symbol,
            order_id = %order_id,
            side = %levels.side(),
            size,
            entry = levels.entry(),
            stop_loss = levels.stop_loss(),
            take_profit = levels.take_profit(),
            "[SIMULATE] Order placed"
        );

        OrderResult::Placed(PlacedOrder {
            order_id,
            status: OrderStatus::Filled,
            side: levels.side(),
            size,
            entry_price: levels.entry(),
            stop_loss_order_id: None,
            take_profit_order_id: None,
            simulated: true,
        })
    }

    async fn place_live(&self, symbol: &Symbol, levels: &BracketLevels, size: f64) -> OrderResult {
        let side = levels.side();
        let entry_kind = match self.order_type {
            OrderType::Market => OrderKind::Market,
            OrderType::Limit => OrderKind::Limit {
                price: levels.entry(),
            },
        };
        let entry = OrderRequest::new(symbol.clone(), side.entry_order_side(), size, entry_kind);

        let handle = match self.connector.submit_order(&entry).await {
            Ok(handle) => handle,
            Err(err) => {
                error!(%symbol, %side, size, error = %err, "Entry order failed");
                return OrderResult::Failed {
                    kind: FailureKind::from(&err),
                    message: err.to_string(),
                };
            }
        };

        info!(
            %symbol,
            order_id = %handle.order_id,
            %side,
            size,
            kind = %entry_kind,
            status = %handle.status,
            "Entry order placed"
        );

        let stop_leg = OrderRequest::new(
            symbol.clone(),
            side.exit_order_side(),
            size,
            OrderKind::StopMarket {
                stop_price: levels.stop_loss(),
            },
        );
        let stop_loss_order_id = self.place_bracket_leg("stop-loss", &stop_leg, &handle.order_id).await;

        let target_leg = OrderRequest::new(
            symbol.clone(),
            side.exit_order_side(),
            size,
            OrderKind::Limit {
                price: levels.take_profit(),
            },
        );
        let take_profit_order_id = self
            .place_bracket_leg("take-profit", &target_leg, &handle.order_id)
            .await;

        OrderResult::Placed(PlacedOrder {
            order_id: handle.order_id,
            status: handle.status,
            side,
            size,
            entry_price: handle.fill_price.unwrap_or(levels.entry()),
            stop_loss_order_id,
            take_profit_order_id,
            simulated: false,
        })
    }

    /// Leg failures leave the entry in place without that protection
    async fn place_bracket_leg(&self, leg: &str, request: &OrderRequest, parent_id: &str) -> Option<String> {
        match self.connector.submit_reduce_only_order(request).await {
            Ok(handle) => {
                info!(leg, parent_id, order_id = %handle.order_id, kind = %request.kind, "Bracket leg placed");
                Some(handle.order_id)
            }
            Err(err) => {
                warn!(
                    leg,
                    parent_id,
                    error = %err,
                    "Bracket leg failed, position is open without it"
                );
                None
            }
        }
    }

    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError> {
        match self.mode {
            ExecutionMode::Simulate => {
                info!(order_id, "[SIMULATE] Order cancelled");
                Ok(())
            }
            ExecutionMode::Live => {
                self.connector.cancel_order(symbol, order_id).await?;
                info!(order_id, "Order cancelled");
                Ok(())
            }
        }
    }

    pub async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        match self.mode {
            ExecutionMode::Simulate => Ok(OrderStatus::Filled),
            ExecutionMode::Live => self.connector.get_order_status(symbol, order_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn long_levels() -> BracketLevels {
        BracketLevels::new(Side::Long, 100.0, 95.0, 110.0).unwrap()
    }

    fn executor(mode: ExecutionMode, order_type: OrderType) -> (OrderExecutor, Arc<PaperExchange>) {
        let exchange = Arc::new(PaperExchange::new());
        (OrderExecutor::new(mode, order_type, exchange.clone()), exchange)
    }

    #[tokio::test]
    async fn test_simulate_never_touches_connector() {
        let (executor, exchange) = executor(ExecutionMode::Simulate, OrderType::Market);
        let symbol = Symbol::new("BTC/USDT");

        let first = executor.place_order(&symbol, &long_levels(), 1.0).await;
        let second = executor.place_order(&symbol, &long_levels(), 1.0).await;

        assert!(first.is_success());
        assert!(first.order_id().unwrap().starts_with("SIM-"));
        assert_ne!(first.order_id(), second.order_id());
        assert!(exchange.orders().is_empty());

        assert!(executor.cancel_order(&symbol, "SIM-1").await.is_ok());
        assert_eq!(executor.get_order_status(&symbol, "SIM-1").await, Ok(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn test_live_places_three_legs() {
        let (executor, exchange) = executor(ExecutionMode::Live, OrderType::Limit);
        let symbol = Symbol::new("BTC/USDT");

        let result = executor.place_order(&symbol, &long_levels(), 2.0).await;
        let OrderResult::Placed(order) = result else {
            panic!("expected placed order");
        };
        assert!(order.stop_loss_order_id.is_some());
        assert!(order.take_profit_order_id.is_some());

        let orders = exchange.orders();
        assert_eq!(orders.len(), 3);

        assert_eq!(orders[0].request.side, OrderSide::Buy);
        assert_eq!(orders[0].request.kind, OrderKind::Limit { price: 100.0 });
        assert!(!orders[0].reduce_only);

        assert_eq!(orders[1].request.side, OrderSide::Sell);
        assert_eq!(orders[1].request.kind, OrderKind::StopMarket { stop_price: 95.0 });
        assert!(orders[1].reduce_only);

        assert_eq!(orders[2].request.side, OrderSide::Sell);
        assert_eq!(orders[2].request.kind, OrderKind::Limit { price: 110.0 });
        assert!(orders[2].reduce_only);
    }

    #[tokio::test]
    async fn test_bracket_leg_failure_keeps_entry() {
        let (executor, exchange) = executor(ExecutionMode::Live, OrderType::Market);
        exchange.reject_reduce_only(true);

        let result = executor
            .place_order(&Symbol::new("BTC/USDT"), &long_levels(), 1.0)
            .await;
        let OrderResult::Placed(order) = result else {
            panic!("entry must stand when legs fail");
        };
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.stop_loss_order_id, None);
        assert_eq!(order.take_profit_order_id, None);
        assert_eq!(exchange.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_entry_errors_are_mapped() {
        let (executor, exchange) = executor(ExecutionMode::Live, OrderType::Market);
        let symbol = Symbol::new("BTC/USDT");

        let cases = [
            (ExchangeError::InsufficientFunds("x".into()), FailureKind::InsufficientFunds),
            (ExchangeError::InvalidOrder("x".into()), FailureKind::InvalidOrder),
            (ExchangeError::Network("x".into()), FailureKind::Network),
            (ExchangeError::Exchange("x".into()), FailureKind::Unexpected),
        ];
        for (err, expected) in cases {
            exchange.fail_next_order(err);
            match executor.place_order(&symbol, &long_levels(), 1.0).await {
                OrderResult::Failed { kind, .. } => assert_eq!(kind, expected),
                other => panic!("expected failure, got {:?}", other),
            }
        }
        assert!(exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_zero_size_never_submitted() {
        let (executor, exchange) = executor(ExecutionMode::Live, OrderType::Market);
        let result = executor
            .place_order(&Symbol::new("BTC/USDT"), &long_levels(), 0.0)
            .await;
        assert!(matches!(result, OrderResult::Failed { kind: FailureKind::InvalidOrder, .. }));
        assert!(exchange.orders().is_empty());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("live".parse::<ExecutionMode>(), Ok(ExecutionMode::Live));
        assert_eq!("DRY_RUN".parse::<ExecutionMode>(), Ok(ExecutionMode::Simulate));
        assert!("yolo".parse::<ExecutionMode>().is_err());
    }
}
