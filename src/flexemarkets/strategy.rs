use std::fmt;

use crate::flexemarkets::payoff::PayoffDistribution;
use crate::flexemarkets::types::{
    BookTop, Holdings, Market, MarketId, Order, OrderRef, OrderSide, Price,
};

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    // 风险厌恶系数 λ
    pub risk_aversion: f64,
    /// Cents below the reference price a Note is offered at.
    pub note_discount: Price,
    /// Cash (cents) under which Notes are liquidated. Enforced by the
    /// holdings manager's `low_cash` flag.
    pub cash_threshold: Price,
    pub order_units: i64,
    pub note_item: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            risk_aversion: 0.5,
            note_discount: 2,
            cash_threshold: 10,
            order_units: 1,
            note_item: "Note".to_string(),
        }
    }
}

impl StrategyConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("CAPM_RISK_AVERSION")  { if let Ok(f) = v.parse() { c.risk_aversion = f; } }
        if let Ok(v) = std::env::var("CAPM_NOTE_DISCOUNT")  { if let Ok(f) = v.parse() { c.note_discount = f; } }
        if let Ok(v) = std::env::var("CAPM_CASH_THRESHOLD") { if let Ok(f) = v.parse() { c.cash_threshold = f; } }
        if let Ok(v) = std::env::var("CAPM_ORDER_UNITS")    { if let Ok(f) = v.parse() { c.order_units = f; } }
        if let Ok(v) = std::env::var("CAPM_NOTE_ITEM") {
            if !v.trim().is_empty() {
                c.note_item = v.trim().to_string();
            }
        }
        c
    }
}

/// A market together with the payoff distribution parsed from its description.
#[derive(Debug, Clone)]
pub struct Asset {
    pub market: Market,
    pub payoff: PayoffDistribution,
}

impl Asset {
    pub fn from_market(market: Market) -> anyhow::Result<Self> {
        let payoff = PayoffDistribution::parse(&market.description)?;
        Ok(Self { market, payoff })
    }
}

/// A single order the strategy wants to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub market_id: MarketId,
    pub item: String,
    pub side: OrderSide,
    pub price: Price,
    pub units: i64,
    /// Utility edge over the quoted price (higher is better).
    pub score: f64,
    pub utility: f64,
    pub reference: OrderRef,
    market: Market,
}

impl Decision {
    pub fn to_order(&self) -> Order {
        Order::limit(&self.market, self.side, self.price, self.units, self.reference)
    }

    pub fn notional(&self) -> Price {
        self.price * self.units
    }
}

/// Why a Note liquidation could not be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationSkip {
    NoNoteMarket,
    NoNotesHeld,
    NoReferencePrice,
}

impl fmt::Display for LiquidationSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiquidationSkip::NoNoteMarket => f.write_str("no Note market"),
            LiquidationSkip::NoNotesHeld => f.write_str("no notes available to sell"),
            LiquidationSkip::NoReferencePrice => f.write_str("no Note price to discount from"),
        }
    }
}

pub struct CapmStrategy {
    cfg: StrategyConfig,
}

impl CapmStrategy {
    pub fn new(cfg: StrategyConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    pub fn utility(&self, payoff: &PayoffDistribution) -> f64 {
        payoff.utility(self.cfg.risk_aversion)
    }

    /// Best trade on one market, if any.
    ///
    /// Buy when utility covers the ask, sell held units when the bid pays
    /// more than the utility. Markets without public orders are skipped.
    pub fn evaluate(&self, asset: &Asset, book: &BookTop, holdings: &Holdings) -> Option<Decision> {
        if !book.has_public_orders {
            return None;
        }
        let utility = self.utility(&asset.payoff);

        let buy = book
            .best_ask
            .filter(|ask| utility >= *ask as f64)
            .map(|ask| self.decision(asset, OrderSide::Buy, ask, utility - ask as f64, utility));

        let sell = book
            .best_bid
            .filter(|bid| utility < *bid as f64)
            .filter(|_| holdings.units_available(&asset.market.item) >= self.cfg.order_units)
            .map(|bid| self.decision(asset, OrderSide::Sell, bid, bid as f64 - utility, utility));

        match (buy, sell) {
            (Some(b), Some(s)) => Some(if s.score > b.score { s } else { b }),
            (b, s) => b.or(s),
        }
    }

    /// Highest-scoring decision across all markets. Ties keep the first seen.
    pub fn select_best<'a, I>(&self, candidates: I, holdings: &Holdings) -> Option<Decision>
    where
        I: IntoIterator<Item = (&'a Asset, &'a BookTop)>,
    {
        let mut best: Option<Decision> = None;
        for (asset, book) in candidates {
            if let Some(d) = self.evaluate(asset, book, holdings) {
                if best.as_ref().map_or(true, |b| d.score > b.score) {
                    best = Some(d);
                }
            }
        }
        best
    }

    pub fn can_afford(&self, decision: &Decision, holdings: &Holdings) -> bool {
        match decision.side {
            OrderSide::Buy => holdings.cash_available >= decision.notional(),
            OrderSide::Sell => true,
        }
    }

    /// Discounted Note sale to raise cash, priced on the Note market's
    /// tick grid and never below one tick.
    pub fn note_liquidation(
        &self,
        note_market: Option<&Market>,
        book: Option<&BookTop>,
        holdings: &Holdings,
    ) -> Result<Decision, LiquidationSkip> {
        let market = note_market.ok_or(LiquidationSkip::NoNoteMarket)?;
        if holdings.units_available(&market.item) < self.cfg.order_units {
            return Err(LiquidationSkip::NoNotesHeld);
        }
        let reference = book
            .and_then(BookTop::reference_price)
            .ok_or(LiquidationSkip::NoReferencePrice)?;
        let price = market
            .floor_to_tick(reference - self.cfg.note_discount)
            .max(market.tick());

        Ok(Decision {
            market_id: market.id,
            item: market.item.clone(),
            side: OrderSide::Sell,
            price,
            units: self.cfg.order_units,
            score: 0.0,
            utility: 0.0,
            reference: OrderRef::NoteLiquidation,
            market: market.clone(),
        })
    }

    fn decision(
        &self,
        asset: &Asset,
        side: OrderSide,
        price: Price,
        score: f64,
        utility: f64,
    ) -> Decision {
        Decision {
            market_id: asset.market.id,
            item: asset.market.item.clone(),
            side,
            price,
            units: self.cfg.order_units,
            score,
            utility,
            reference: OrderRef::MainOrder,
            market: asset.market.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flexemarkets::types::AssetHolding;

    fn market(id: MarketId, item: &str, desc: &str) -> Market {
        Market {
            id,
            item: item.to_string(),
            description: desc.to_string(),
            tick: 1,
        }
    }

    fn asset(id: MarketId, item: &str, desc: &str) -> Asset {
        Asset::from_market(market(id, item, desc)).unwrap()
    }

    fn holdings(cash: Price, assets: &[(&str, i64)]) -> Holdings {
        Holdings {
            cash,
            cash_available: cash,
            assets: assets
                .iter()
                .map(|(item, n)| {
                    (
                        item.to_string(),
                        AssetHolding {
                            units: *n,
                            units_available: *n,
                        },
                    )
                })
                .collect(),
        }
    }

    fn strategy() -> CapmStrategy {
        CapmStrategy::new(StrategyConfig::default())
    }

    // ── Worked example: E=90, Var=16, λ=0.5 → U=82 ──

    #[test]
    fn test_no_buy_when_ask_above_utility() {
        let a = asset(1, "A", "86,94");
        let book = BookTop::new(None, Some(85), None);
        assert!(strategy().evaluate(&a, &book, &holdings(1000, &[])).is_none());
    }

    #[test]
    fn test_buy_when_ask_drops_to_utility() {
        let s = strategy();
        let a = asset(1, "A", "86,94");
        for ask in [82, 80] {
            let book = BookTop::new(None, Some(ask), None);
            let d = s.evaluate(&a, &book, &holdings(1000, &[])).unwrap();
            assert_eq!(d.side, OrderSide::Buy);
            assert_eq!(d.price, ask);
            assert_eq!(d.units, 1);
            assert_eq!(d.reference, OrderRef::MainOrder);
            assert!((d.utility - 82.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sell_when_bid_above_utility_and_held() {
        let s = strategy();
        let a = asset(1, "A", "86,94");
        let book = BookTop::new(Some(88), Some(95), None);

        let d = s.evaluate(&a, &book, &holdings(0, &[("A", 2)])).unwrap();
        assert_eq!(d.side, OrderSide::Sell);
        assert_eq!(d.price, 88);
        assert!((d.score - 6.0).abs() < 1e-9);

        assert!(s.evaluate(&a, &book, &holdings(0, &[])).is_none());
    }

    #[test]
    fn test_skip_market_without_public_orders() {
        let a = asset(1, "A", "100");
        let book = BookTop::default();
        assert!(strategy().evaluate(&a, &book, &holdings(1000, &[])).is_none());
    }

    #[test]
    fn test_select_best_picks_highest_score() {
        let s = strategy();
        let a = asset(1, "A", "50");
        let b = asset(2, "B", "60");
        let book_a = BookTop::new(None, Some(45), None); // score 5
        let book_b = BookTop::new(None, Some(50), None); // score 10
        let h = holdings(1000, &[]);

        let d = s.select_best([(&a, &book_a), (&b, &book_b)], &h).unwrap();
        assert_eq!(d.market_id, 2);
        assert_eq!(d.item, "B");

        let none = BookTop::default();
        let d = s.select_best([(&a, &book_a), (&b, &none)], &h).unwrap();
        assert_eq!(d.market_id, 1);
    }

    #[test]
    fn test_can_afford() {
        let s = strategy();
        let a = asset(1, "A", "100");
        let book = BookTop::new(Some(120), Some(90), None);
        let buy = s.evaluate(&a, &book, &holdings(0, &[])).unwrap();
        assert_eq!(buy.side, OrderSide::Buy);
        assert!(!s.can_afford(&buy, &holdings(89, &[])));
        assert!(s.can_afford(&buy, &holdings(90, &[])));

        let sell = s.evaluate(&a, &BookTop::new(Some(120), None, None), &holdings(0, &[("A", 1)])).unwrap();
        assert!(s.can_afford(&sell, &holdings(0, &[("A", 1)])));
    }

    #[test]
    fn test_note_liquidation_price_and_skips() {
        let s = strategy();
        let note = market(9, "Note", "");
        let h = holdings(0, &[("Note", 3)]);

        let d = s
            .note_liquidation(Some(&note), Some(&BookTop::new(Some(20), Some(25), None)), &h)
            .unwrap();
        assert_eq!(d.side, OrderSide::Sell);
        assert_eq!(d.price, 18);
        assert_eq!(d.reference, OrderRef::NoteLiquidation);
        assert_eq!(d.to_order().market_id, 9);

        let d = s
            .note_liquidation(Some(&note), Some(&BookTop::new(Some(2), None, None)), &h)
            .unwrap();
        assert_eq!(d.price, 1);

        assert_eq!(
            s.note_liquidation(None, None, &h),
            Err(LiquidationSkip::NoNoteMarket)
        );
        assert_eq!(
            s.note_liquidation(Some(&note), None, &holdings(0, &[])),
            Err(LiquidationSkip::NoNotesHeld)
        );
        assert_eq!(
            s.note_liquidation(Some(&note), Some(&BookTop::default()), &h),
            Err(LiquidationSkip::NoReferencePrice)
        );
    }

    #[test]
    fn test_note_liquidation_respects_tick() {
        let s = strategy();
        let mut note = market(9, "Note", "");
        note.tick = 5;
        let h = holdings(0, &[("Note", 1)]);

        // 20 − 2 = 18 → 15 on a 5-cent grid
        let d = s
            .note_liquidation(Some(&note), Some(&BookTop::new(Some(20), None, None)), &h)
            .unwrap();
        assert_eq!(d.price, 15);
        assert_eq!(d.to_order().price, 15);

        // never below one tick
        let d = s
            .note_liquidation(Some(&note), Some(&BookTop::new(Some(5), None, None)), &h)
            .unwrap();
        assert_eq!(d.price, 5);
    }

    #[test]
    fn test_crossed_book_takes_higher_score() {
        let s = strategy();
        // U = 82
        let a = asset(1, "A", "86,94");
        let h = holdings(1000, &[("A", 1)]);

        // buy edge 2, sell edge 8
        let d = s.evaluate(&a, &BookTop::new(Some(90), Some(80), None), &h).unwrap();
        assert_eq!(d.side, OrderSide::Sell);
        assert_eq!(d.price, 90);
        assert!((d.score - 8.0).abs() < 1e-9);

        // buy edge 12, sell edge 2
        let d = s.evaluate(&a, &BookTop::new(Some(84), Some(70), None), &h).unwrap();
        assert_eq!(d.side, OrderSide::Buy);
        assert_eq!(d.price, 70);
        assert!((d.score - 12.0).abs() < 1e-9);
    }
}
