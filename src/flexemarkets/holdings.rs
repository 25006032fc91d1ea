//! Holdings Manager Actor.
//!
//! Keeps the latest cash / asset snapshot pushed by the marketplace and
//! broadcasts it via a `watch` channel for the agent to read.

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::messages::HoldingsState;
use super::types::{Holdings, Price};

#[derive(Debug, Clone)]
pub struct HoldingsConfig {
    /// Cash available (cents) under which the account is flagged low on cash.
    pub cash_threshold: Price,
}

impl Default for HoldingsConfig {
    fn default() -> Self {
        Self { cash_threshold: 10 }
    }
}

pub struct HoldingsManager {
    cfg: HoldingsConfig,
    state: HoldingsState,
    holdings_rx: mpsc::Receiver<Holdings>,
    state_tx: watch::Sender<HoldingsState>,
}

impl HoldingsManager {
    pub fn new(
        cfg: HoldingsConfig,
        holdings_rx: mpsc::Receiver<Holdings>,
        state_tx: watch::Sender<HoldingsState>,
    ) -> Self {
        Self {
            cfg,
            state: HoldingsState::default(),
            holdings_rx,
            state_tx,
        }
    }

    /// Actor main loop. Runs until the holdings channel is closed.
    pub async fn run(mut self) {
        info!(
            "💰 HoldingsManager started | cash_threshold={}",
            self.cfg.cash_threshold
        );

        while let Some(holdings) = self.holdings_rx.recv().await {
            self.apply(holdings);
            let _ = self.state_tx.send(self.state.clone());
        }

        info!("💰 HoldingsManager shutting down (channel closed)");
    }

    fn apply(&mut self, holdings: Holdings) {
        let low_cash = holdings.cash_available < self.cfg.cash_threshold;

        info!(
            "💰 Cash available: {} (cash={}, assets={})",
            holdings.cash_available,
            holdings.cash,
            holdings.assets.len(),
        );
        if low_cash && !self.state.low_cash {
            warn!(
                "💸 Cash below threshold: {} < {}",
                holdings.cash_available, self.cfg.cash_threshold
            );
        } else if !low_cash && self.state.low_cash {
            info!("✅ Cash recovered: {}", holdings.cash_available);
        }

        self.state = HoldingsState {
            holdings: Some(holdings),
            low_cash,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(cash_available: Price) -> Holdings {
        Holdings {
            cash: cash_available,
            cash_available,
            ..Default::default()
        }
    }

    fn manager() -> HoldingsManager {
        let (state_tx, _state_rx) = watch::channel(HoldingsState::default());
        let (_tx, rx) = mpsc::channel(4);
        HoldingsManager::new(HoldingsConfig::default(), rx, state_tx)
    }

    #[test]
    fn test_low_cash_flag() {
        let mut hm = manager();
        assert!(hm.state.holdings.is_none());

        hm.apply(snapshot(5));
        assert!(hm.state.low_cash);

        hm.apply(snapshot(10));
        assert!(!hm.state.low_cash);
        assert_eq!(hm.state.holdings.as_ref().map(|h| h.cash_available), Some(10));
    }

    #[tokio::test]
    async fn test_broadcasts_latest_snapshot() {
        let (state_tx, mut state_rx) = watch::channel(HoldingsState::default());
        let (tx, rx) = mpsc::channel(4);
        let h = tokio::spawn(HoldingsManager::new(HoldingsConfig::default(), rx, state_tx).run());

        tx.send(snapshot(250)).await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), state_rx.changed())
            .await
            .unwrap()
            .unwrap();
        let state = state_rx.borrow().clone();
        assert_eq!(state.holdings.map(|h| h.cash_available), Some(250));
        assert!(!state.low_cash);

        drop(tx);
        let _ = h.await;
    }
}
