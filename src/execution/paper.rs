//! In-memory exchange for paper trading and tests
//!
//! Orders are recorded, never matched against a book: market orders report
//! `filled` immediately, limit and stop orders rest as `open` until cancelled.
//! Failures can be injected to exercise the executor's error paths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::connector::{ExchangeConnector, ExchangeError, OrderHandle, OrderKind, OrderRequest, OrderStatus};
use crate::types::Symbol;

#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub order_id: String,
    pub request: OrderRequest,
    pub reduce_only: bool,
    pub status: OrderStatus,
}

#[derive(Debug, Default)]
pub struct PaperExchange {
    balances: Mutex<HashMap<String, f64>>,
    orders: Mutex<Vec<PaperOrder>>,
    sequence: AtomicU64,
    reject_reduce_only: AtomicBool,
    next_failure: Mutex<Option<ExchangeError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ExchangeError> {
    mutex
        .lock()
        .map_err(|_| ExchangeError::Exchange("paper exchange state poisoned".to_string()))
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, currency: impl Into<String>, amount: f64) -> Self {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert(currency.into(), amount);
        }
        self
    }

    pub fn balances(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        Ok(lock(&self.balances)?.clone())
    }

    /// Every order submitted so far, in submission order
    pub fn orders(&self) -> Vec<PaperOrder> {
        self.orders.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Fail the next primary or reduce-only submission with `error`
    pub fn fail_next_order(&self, error: ExchangeError) {
        if let Ok(mut next) = self.next_failure.lock() {
            *next = Some(error);
        }
    }

    /// Reject every reduce-only order, as a venue without an open position would
    pub fn reject_reduce_only(&self, reject: bool) {
        self.reject_reduce_only.store(reject, Ordering::SeqCst);
    }

    fn record(&self, request: &OrderRequest, reduce_only: bool) -> Result<OrderHandle, ExchangeError> {
        if let Some(error) = lock(&self.next_failure)?.take() {
            return Err(error);
        }
        if request.quantity <= 0.0 || !request.quantity.is_finite() {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("PAPER-{}", seq);
        let status = match request.kind {
            OrderKind::Market => OrderStatus::Filled,
            OrderKind::Limit { .. } | OrderKind::StopMarket { .. } => OrderStatus::Open,
        };

        debug!(
            order_id = %order_id,
            side = %request.side,
            quantity = request.quantity,
            kind = %request.kind,
            reduce_only,
            "Paper order recorded"
        );

        lock(&self.orders)?.push(PaperOrder {
            order_id: order_id.clone(),
            request: request.clone(),
            reduce_only,
            status,
        });

        Ok(OrderHandle {
            order_id,
            status,
            fill_price: None,
        })
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderHandle, ExchangeError> {
        self.record(request, false)
    }

    async fn submit_reduce_only_order(&self, request: &OrderRequest) -> Result<OrderHandle, ExchangeError> {
        if self.reject_reduce_only.load(Ordering::SeqCst) {
            return Err(ExchangeError::InvalidOrder("reduce-only order rejected".to_string()));
        }
        self.record(request, true)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> Result<(), ExchangeError> {
        let mut orders = lock(&self.orders)?;
        let order = orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))?;

        match order.status {
            OrderStatus::Open | OrderStatus::PartiallyFilled => {
                order.status = OrderStatus::Cancelled;
                Ok(())
            }
            status => Err(ExchangeError::InvalidOrder(format!(
                "order {} is {} and cannot be cancelled",
                order_id, status
            ))),
        }
    }

    async fn get_order_status(&self, _symbol: &Symbol, order_id: &str) -> Result<OrderStatus, ExchangeError> {
        lock(&self.orders)?
            .iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.status)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.to_string()))
    }
}
