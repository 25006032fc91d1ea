//! Channel message types for the CAPM agent actors.
//!
//! Feed → Agent (market events), Feed → HoldingsManager (snapshots),
//! Agent → Executor (orders), Executor → Agent (order outcomes).

use std::time::Instant;

use super::types::{BookTop, Holdings, MarketId, Order, RejectReason};

// ─────────────────────────────────────────────────────────
// Market Events (WebSocket → Agent)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// Trading session opened or closed.
    Session { is_open: bool },
    /// Top of book changed on one market.
    Book {
        market_id: MarketId,
        book: BookTop,
        ts: Instant,
    },
}

// ─────────────────────────────────────────────────────────
// Holdings (WebSocket → HoldingsManager → watch)
// ─────────────────────────────────────────────────────────

/// Latest holdings as seen by the agent.
#[derive(Debug, Clone, Default)]
pub struct HoldingsState {
    /// `None` until the first snapshot arrives.
    pub holdings: Option<Holdings>,
    /// Cash available is under the liquidity threshold.
    pub low_cash: bool,
}

// ─────────────────────────────────────────────────────────
// Execution Commands (Agent → Executor)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ExecutionCmd {
    /// Submit a limit order.
    Place(Order),
}

// ─────────────────────────────────────────────────────────
// Order Results (Executor → Agent)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum OrderResult {
    Accepted { order_id: String, order: Order },
    Rejected { order: Order, reason: RejectReason },
    /// Transport or protocol failure: the marketplace never answered.
    Failed { order: Order, error: String },
}

impl OrderResult {
    pub fn order(&self) -> &Order {
        match self {
            OrderResult::Accepted { order, .. }
            | OrderResult::Rejected { order, .. }
            | OrderResult::Failed { order, .. } => order,
        }
    }
}
