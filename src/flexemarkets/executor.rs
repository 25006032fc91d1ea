//! Executor Actor — limit order submission.
//!
//! Every `ExecutionCmd::Place` produces exactly one `OrderResult` back to
//! the agent, so the agent's pending slot for that market always clears.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::client::FmClient;
use super::messages::{ExecutionCmd, OrderResult};
use super::types::Order;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { dry_run: true }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("CAPM_DRY_RUN") {
            c.dry_run = v != "0" && v.to_lowercase() != "false";
        }
        c
    }
}

pub struct Executor {
    cfg: ExecutorConfig,
    client: Option<Arc<FmClient>>,
    cmd_rx: mpsc::Receiver<ExecutionCmd>,
    result_tx: mpsc::Sender<OrderResult>,
    sent: u64,
}

impl Executor {
    pub fn new(
        cfg: ExecutorConfig,
        client: Option<Arc<FmClient>>,
        cmd_rx: mpsc::Receiver<ExecutionCmd>,
        result_tx: mpsc::Sender<OrderResult>,
    ) -> Self {
        Self {
            cfg,
            client,
            cmd_rx,
            result_tx,
            sent: 0,
        }
    }

    pub async fn run(mut self) {
        info!(
            "⚡ Executor started | dry_run={} has_client={}",
            self.cfg.dry_run,
            self.client.is_some(),
        );

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ExecutionCmd::Place(order) => {
                    let result = self.handle_place(order).await;
                    let _ = self.result_tx.send(result).await;
                }
            }
        }

        info!("⚡ Executor shutting down | sent={}", self.sent);
    }

    async fn handle_place(&mut self, order: Order) -> OrderResult {
        info!(
            "📤 {} {} units={} @ {} market={} ref={}",
            order.order_side,
            order.item,
            order.units,
            order.price,
            order.market_id,
            order.reference.as_str(),
        );
        self.sent += 1;

        let client = match &self.client {
            Some(c) if !self.cfg.dry_run => c,
            _ => {
                let order_id = format!("dry-{}", uuid::Uuid::new_v4());
                info!(
                    "📝 [DRY-RUN] {} {} @ {} id={} at={}",
                    order.order_side,
                    order.item,
                    order.price,
                    order_id,
                    chrono::Utc::now().to_rfc3339(),
                );
                return OrderResult::Accepted { order_id, order };
            }
        };

        match client.submit_order(&order).await {
            Ok(ack) => ack.into_result(order),
            Err(e) => {
                warn!("❌ Failed to place order on market {}: {:?}", order.market_id, e);
                OrderResult::Failed {
                    order,
                    error: format!("{e:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flexemarkets::types::{Market, OrderRef, OrderSide};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dry_run_accepts_every_order() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);
        let h = tokio::spawn(Executor::new(ExecutorConfig::default(), None, cmd_rx, result_tx).run());

        let market = Market {
            id: 3,
            item: "B".to_string(),
            description: "5".to_string(),
            tick: 1,
        };
        let order = Order::limit(&market, OrderSide::Buy, 4, 1, OrderRef::MainOrder);
        cmd_tx.send(ExecutionCmd::Place(order.clone())).await.unwrap();

        let r = tokio::time::timeout(Duration::from_millis(200), result_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match r {
            OrderResult::Accepted { order_id, order: o } => {
                assert!(order_id.starts_with("dry-"));
                assert_eq!(o, order);
            }
            other => panic!("unexpected {other:?}"),
        }

        drop(cmd_tx);
        let _ = h.await;
    }
}
