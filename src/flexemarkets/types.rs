use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Prices and cash are integer cents.
pub type Price = i64;

pub type MarketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
}

/// Tag attached to every order so fills and rejections can be traced back
/// to the decision that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRef {
    MainOrder,
    NoteLiquidation,
}

impl OrderRef {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderRef::MainOrder => "main_order",
            OrderRef::NoteLiquidation => "note_liquidation",
        }
    }
}

/// A tradeable market inside the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: MarketId,
    pub item: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_tick")]
    pub tick: Price,
}

fn default_tick() -> Price {
    1
}

impl Market {
    /// Price step, never below one cent.
    pub fn tick(&self) -> Price {
        self.tick.max(1)
    }

    /// Round `price` down onto the market's tick grid.
    pub fn floor_to_tick(&self, price: Price) -> Price {
        let tick = self.tick();
        price.div_euclid(tick) * tick
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marketplace {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Session state at the time of the request.
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub markets: Vec<Market>,
}

/// Top of book for a single market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookTop {
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub last_price: Option<Price>,
    pub has_public_orders: bool,
}

impl BookTop {
    pub fn new(best_bid: Option<Price>, best_ask: Option<Price>, last_price: Option<Price>) -> Self {
        Self {
            best_bid,
            best_ask,
            last_price,
            has_public_orders: best_bid.is_some() || best_ask.is_some(),
        }
    }

    /// Reference price for a discounted sale: bid, then last trade, then ask.
    pub fn reference_price(&self) -> Option<Price> {
        self.best_bid.or(self.last_price).or(self.best_ask)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHolding {
    pub units: i64,
    pub units_available: i64,
}

/// Cash and asset snapshot for the trading account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holdings {
    pub cash: Price,
    pub cash_available: Price,
    /// Keyed by item name.
    #[serde(default)]
    pub assets: HashMap<String, AssetHolding>,
}

impl Holdings {
    pub fn units_available(&self, item: &str) -> i64 {
        self.assets.get(item).map(|a| a.units_available).unwrap_or(0)
    }
}

/// Order as submitted to the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub market_id: MarketId,
    #[serde(skip)]
    pub item: String,
    #[serde(rename = "side")]
    pub order_side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Price,
    pub units: i64,
    #[serde(rename = "ref")]
    pub reference: OrderRef,
}

impl Order {
    pub fn limit(
        market: &Market,
        side: OrderSide,
        price: Price,
        units: i64,
        reference: OrderRef,
    ) -> Self {
        Self {
            market_id: market.id,
            item: market.item.clone(),
            order_side: side,
            order_type: OrderType::Limit,
            price,
            units,
            reference,
        }
    }

    pub fn notional(&self) -> Price {
        self.price * self.units
    }
}

/// Why the marketplace refused an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientCash,
    InsufficientAssets,
    Other(String),
}

impl RejectReason {
    pub fn parse(code: &str) -> Self {
        let code = code.trim();
        if code.contains("ORDER_INSUFFICIENT_CASH") {
            RejectReason::InsufficientCash
        } else if code.contains("ORDER_INSUFFICIENT_ASSETS") {
            RejectReason::InsufficientAssets
        } else {
            RejectReason::Other(code.to_string())
        }
    }

    /// Rejections that selling a Note might fix.
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(
            self,
            RejectReason::InsufficientCash | RejectReason::InsufficientAssets
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientCash => f.write_str("ORDER_INSUFFICIENT_CASH"),
            RejectReason::InsufficientAssets => f.write_str("ORDER_INSUFFICIENT_ASSETS"),
            RejectReason::Other(s) => f.write_str(s),
        }
    }
}
