//! CAPM Agent — the reactive trading loop.
//!
//! Every order book update re-scores all assets by mean-variance utility.
//! An update sends at most one trading order, plus a Note sale when cash
//! is low:
//!
//! 1. **Liquidity first**: cash under the threshold → sell a Note at a
//!    discount.
//! 2. **Best asset**: the highest-scoring buy/sell across markets. If the
//!    buy is unaffordable, raise cash instead.
//! 3. **Rejections**: insufficient funds → sell a Note.
//!
//! One in-flight order per market. A slot clears when the executor reports
//! back; a debounce window spaces out orders on the same market.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::messages::{ExecutionCmd, HoldingsState, MarketEvent, OrderResult};
use super::strategy::{Asset, CapmStrategy, Decision};
use super::types::{BookTop, Holdings, Market, MarketId};

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Minimum time between two orders on the same market.
    pub debounce_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("CAPM_DEBOUNCE_MS") { if let Ok(n) = v.parse() { c.debounce_ms = n; } }
        c
    }
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PendingSlot {
    active: bool,
    last_placed: Instant,
}

impl Default for PendingSlot {
    fn default() -> Self {
        Self {
            active: false,
            // Start in the past so the first order isn't debounced
            last_placed: Instant::now()
                .checked_sub(Duration::from_secs(60))
                .unwrap_or_else(Instant::now),
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    updates: u64,
    placed: u64,
    accepted: u64,
    rejected: u64,
    failed: u64,
    liquidations: u64,
    skipped_no_holdings: u64,
    skipped_closed: u64,
    skipped_pending: u64,
    skipped_debounce: u64,
    unaffordable: u64,
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct CapmAgent {
    cfg: CoordinatorConfig,
    strategy: CapmStrategy,
    markets: HashMap<MarketId, Market>,
    /// Markets whose description parsed into a payoff distribution.
    assets: BTreeMap<MarketId, Asset>,
    note_market: Option<MarketId>,
    books: HashMap<MarketId, BookTop>,
    session_open: bool,
    slots: HashMap<MarketId, PendingSlot>,
    stats: Stats,

    holdings_rx: watch::Receiver<HoldingsState>,
    md_rx: mpsc::Receiver<MarketEvent>,
    exec_tx: mpsc::Sender<ExecutionCmd>,
    result_rx: mpsc::Receiver<OrderResult>,
}

impl CapmAgent {
    pub fn new(
        cfg: CoordinatorConfig,
        strategy: CapmStrategy,
        markets: Vec<Market>,
        holdings_rx: watch::Receiver<HoldingsState>,
        md_rx: mpsc::Receiver<MarketEvent>,
        exec_tx: mpsc::Sender<ExecutionCmd>,
        result_rx: mpsc::Receiver<OrderResult>,
    ) -> Self {
        let note_item = strategy.config().note_item.clone();
        let note_market = markets.iter().find(|m| m.item == note_item).map(|m| m.id);

        let mut assets = BTreeMap::new();
        for market in &markets {
            match Asset::from_market(market.clone()) {
                Ok(asset) => {
                    info!(
                        "📈 {} (market {}) E={:.2} Var={:.2} U={:.2}",
                        market.item,
                        market.id,
                        asset.payoff.expectation(),
                        asset.payoff.variance(),
                        strategy.utility(&asset.payoff),
                    );
                    assets.insert(market.id, asset);
                }
                Err(e) if market.item == note_item => {
                    debug!("Note market {} has no payoff description: {}", market.id, e);
                }
                Err(e) => {
                    warn!("⚠️ Skipping market {} ({}): {:#}", market.id, market.item, e);
                }
            }
        }

        info!(
            "🤖 Bot initialised | assets={} note_market={:?}",
            assets.len(),
            note_market
        );

        Self {
            cfg,
            strategy,
            markets: markets.into_iter().map(|m| (m.id, m)).collect(),
            assets,
            note_market,
            books: HashMap::new(),
            session_open: false,
            slots: HashMap::new(),
            stats: Stats::default(),
            holdings_rx,
            md_rx,
            exec_tx,
            result_rx,
        }
    }

    /// Session state known at startup, before the feed reports one.
    pub fn with_session_open(mut self, is_open: bool) -> Self {
        self.session_open = is_open;
        self
    }

    pub async fn run(mut self) {
        info!(
            "🎯 CapmAgent started | λ={:.3} note_discount={} cash_threshold={} units={} debounce={}ms",
            self.strategy.config().risk_aversion,
            self.strategy.config().note_discount,
            self.strategy.config().cash_threshold,
            self.strategy.config().order_units,
            self.cfg.debounce_ms,
        );

        loop {
            tokio::select! {
                msg = self.md_rx.recv() => {
                    match msg {
                        Some(MarketEvent::Session { is_open }) => self.on_session(is_open),
                        Some(MarketEvent::Book { market_id, book, .. }) => {
                            self.books.insert(market_id, book);
                            self.stats.updates += 1;
                            self.tick().await;
                        }
                        None => break,
                    }
                }
                Some(result) = self.result_rx.recv() => {
                    self.on_result(result).await;
                }
            }
        }

        info!(
            "🎯 Shutdown | updates={} placed={} accepted={} rejected={} failed={} liquidations={} unaffordable={} skip(no_holdings={} closed={} pending={} debounce={})",
            self.stats.updates, self.stats.placed, self.stats.accepted,
            self.stats.rejected, self.stats.failed, self.stats.liquidations,
            self.stats.unaffordable, self.stats.skipped_no_holdings,
            self.stats.skipped_closed, self.stats.skipped_pending, self.stats.skipped_debounce,
        );
    }

    fn on_session(&mut self, is_open: bool) {
        if is_open {
            info!("🔔 Session opened.");
        } else {
            info!("🔕 Session closed.");
        }
        self.session_open = is_open;
    }

    // ═════════════════════════════════════════════════
    // Main tick
    // ═════════════════════════════════════════════════

    async fn tick(&mut self) {
        let state = self.holdings_rx.borrow().clone();
        let holdings = match state.holdings {
            Some(h) => h,
            None => {
                self.stats.skipped_no_holdings += 1;
                return;
            }
        };
        if !self.session_open {
            self.stats.skipped_closed += 1;
            return;
        }

        if state.low_cash {
            debug!(
                "💸 Cash {} below threshold {}",
                holdings.cash_available,
                self.strategy.config().cash_threshold
            );
            self.raise_cash(&holdings).await;
        }

        let best = self.strategy.select_best(
            self.assets
                .values()
                .filter_map(|a| self.books.get(&a.market.id).map(|b| (a, b))),
            &holdings,
        );
        let Some(decision) = best else {
            return;
        };

        if self.strategy.can_afford(&decision, &holdings) {
            self.place(decision).await;
        } else {
            self.stats.unaffordable += 1;
            info!(
                "🪙 Cannot afford {} @ {} (cash={}). Attempting to raise cash.",
                decision.item, decision.price, holdings.cash_available
            );
            self.raise_cash(&holdings).await;
        }
    }

    // ═════════════════════════════════════════════════
    // Order outcomes
    // ═════════════════════════════════════════════════

    async fn on_result(&mut self, result: OrderResult) {
        self.clear_slot(result.order().market_id);

        match result {
            OrderResult::Accepted { order_id, order } => {
                self.stats.accepted += 1;
                info!(
                    "✅ Order accepted: {} {} {} @ {} id={}",
                    order.order_side, order.units, order.item, order.price, order_id
                );
            }
            OrderResult::Rejected { order, reason } => {
                self.stats.rejected += 1;
                error!(
                    "❌ Order rejected: {} | {} {} @ {} ref={}",
                    reason,
                    order.order_side,
                    order.item,
                    order.price,
                    order.reference.as_str()
                );
                if reason.is_insufficient_funds() {
                    info!("💵 Attempting to raise cash.");
                    let holdings = self.holdings_rx.borrow().holdings.clone();
                    if let Some(h) = holdings {
                        self.raise_cash(&h).await;
                    }
                }
            }
            OrderResult::Failed { order, error } => {
                self.stats.failed += 1;
                warn!(
                    "⚠️ Order failed on market {} ({}): {}",
                    order.market_id, order.item, error
                );
            }
        }
    }

    // ═════════════════════════════════════════════════
    // Liquidity
    // ═════════════════════════════════════════════════

    async fn raise_cash(&mut self, holdings: &Holdings) {
        let note = self.note_market.and_then(|id| self.markets.get(&id));
        let book = note.and_then(|m| self.books.get(&m.id));

        match self.strategy.note_liquidation(note, book, holdings) {
            Ok(decision) => {
                info!(
                    "💵 Selling {} {} @ {} to raise cash",
                    decision.units, decision.item, decision.price
                );
                if self.place(decision).await {
                    self.stats.liquidations += 1;
                }
            }
            Err(skip) => info!("🪙 Cannot raise cash: {}", skip),
        }
    }

    // ═════════════════════════════════════════════════
    // Plumbing
    // ═════════════════════════════════════════════════

    /// Returns true if the order went out.
    async fn place(&mut self, decision: Decision) -> bool {
        let debounce = Duration::from_millis(self.cfg.debounce_ms);
        let slot = self.slots.entry(decision.market_id).or_default();

        if slot.active {
            self.stats.skipped_pending += 1;
            return false;
        }
        if slot.last_placed.elapsed() < debounce {
            self.stats.skipped_debounce += 1;
            return false;
        }

        slot.active = true;
        slot.last_placed = Instant::now();
        self.stats.placed += 1;

        info!(
            "🧮 {} {} {} @ {} | U={:.2} score={:.2}",
            decision.side, decision.units, decision.item, decision.price,
            decision.utility, decision.score,
        );
        if self
            .exec_tx
            .send(ExecutionCmd::Place(decision.to_order()))
            .await
            .is_err()
        {
            warn!("⚠️ Executor channel closed — order dropped");
            self.clear_slot(decision.market_id);
            return false;
        }
        true
    }

    fn clear_slot(&mut self, market_id: MarketId) {
        if let Some(slot) = self.slots.get_mut(&market_id) {
            slot.active = false;
        }
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────
