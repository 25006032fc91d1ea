//! CAPM Bot — mean-variance trading agent for Flexemarkets.
//!
//! Actor-based architecture:
//!   WebSocket ──→ MarketFeed ──book/session──→ CapmAgent ──→ Executor ──→ REST
//!                     └──holdings──→ HoldingsManager ──(watch)──┘
//!
//! Lifecycle: load marketplace + holdings over REST → spawn actors → run
//! until Ctrl-C or the feed dies → drain and exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use capm_bot::config::Settings;
use capm_bot::flexemarkets::client::FmClient;
use capm_bot::flexemarkets::coordinator::{CapmAgent, CoordinatorConfig};
use capm_bot::flexemarkets::executor::{Executor, ExecutorConfig};
use capm_bot::flexemarkets::feed::{FeedConfig, MarketFeed};
use capm_bot::flexemarkets::holdings::{HoldingsConfig, HoldingsManager};
use capm_bot::flexemarkets::messages::*;
use capm_bot::flexemarkets::strategy::{CapmStrategy, StrategyConfig};
use capm_bot::flexemarkets::types::Holdings;
use capm_bot::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_from_env();

    info!("═══════════════════════════════════════════════════");
    info!("  CAPM Bot — E[payoff] − λ·Var trading agent");
    info!("═══════════════════════════════════════════════════");

    let settings = Settings::from_env()?;
    let strategy_cfg = StrategyConfig::from_env();
    let holdings_cfg = HoldingsConfig {
        cash_threshold: strategy_cfg.cash_threshold,
    };
    let coord_cfg = CoordinatorConfig::from_env();
    let exec_cfg = ExecutorConfig::from_env();

    info!(
        "📊 Config: account={} marketplace={} λ={:.3} note_discount={} cash_threshold={} dry={}",
        settings.account,
        settings.marketplace_id,
        strategy_cfg.risk_aversion,
        strategy_cfg.note_discount,
        strategy_cfg.cash_threshold,
        exec_cfg.dry_run,
    );

    // ═══ REST bootstrap ═══
    let client = Arc::new(FmClient::new(&settings)?);
    let marketplace = client
        .marketplace()
        .await
        .context("Failed to load marketplace")?;
    if marketplace.markets.is_empty() {
        anyhow::bail!("Marketplace {} has no markets", marketplace.id);
    }
    info!(
        "🏛️ Marketplace {} '{}' | markets={} open={}",
        marketplace.id,
        marketplace.name,
        marketplace.markets.len(),
        marketplace.is_open,
    );

    let initial_holdings = match client.holdings().await {
        Ok(h) => Some(h),
        Err(e) => {
            warn!("⚠️ Initial holdings unavailable, waiting for feed: {:#}", e);
            None
        }
    };

    // ═══ Channels ═══
    let (holdings_tx, holdings_rx) = mpsc::channel::<Holdings>(32);
    let (state_tx, state_rx) = watch::channel(HoldingsState::default());
    let (md_tx, md_rx) = mpsc::channel::<MarketEvent>(512);
    let (exec_tx, exec_rx) = mpsc::channel::<ExecutionCmd>(32);
    let (result_tx, result_rx) = mpsc::channel::<OrderResult>(32);

    if let Some(h) = initial_holdings {
        let _ = holdings_tx.send(h).await;
    }

    // ═══ Actors ═══
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let hm = HoldingsManager::new(holdings_cfg, holdings_rx, state_tx);
    handles.push(tokio::spawn(hm.run()));

    let agent = CapmAgent::new(
        coord_cfg,
        CapmStrategy::new(strategy_cfg),
        marketplace.markets.clone(),
        state_rx,
        md_rx,
        exec_tx,
        result_rx,
    )
    .with_session_open(marketplace.is_open);
    handles.push(tokio::spawn(agent.run()));

    let executor = Executor::new(exec_cfg, Some(client.clone()), exec_rx, result_tx);
    handles.push(tokio::spawn(executor.run()));

    let feed = MarketFeed::new(
        FeedConfig::new(
            settings.feed_url()?,
            client.basic_auth_header(),
            settings.account.clone(),
        ),
        md_tx,
        holdings_tx,
    );
    let feed_handle = tokio::spawn(feed.run());

    info!("🚀 Actors spawned — trading");

    // Dropping the feed closes the agent's and holdings manager's inputs;
    // the rest of the pipeline drains in order.
    let feed_ended = run_feed_until(feed_handle, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("🛑 Ctrl-C received — shutting down");
    })
    .await;
    if feed_ended {
        warn!("📡 Feed task ended — shutting down");
    }

    for h in handles {
        if tokio::time::timeout(Duration::from_secs(2), h).await.is_err() {
            warn!("⏱️ Actor did not stop within 2s");
        }
    }

    info!("👋 Bye");
    Ok(())
}

/// Waits for the feed task to end or for `shutdown` to fire, whichever
/// comes first. Returns true if the feed ended on its own. A feed still
/// running at shutdown is aborted; a finished handle is never polled again.
async fn run_feed_until<F>(mut feed: JoinHandle<()>, shutdown: F) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        res = &mut feed => {
            if let Err(e) = res {
                warn!("📡 Feed task failed: {}", e);
            }
            true
        }
        _ = shutdown => {
            feed.abort();
            let _ = feed.await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_feed_is_not_polled_again() {
        let feed = tokio::spawn(async {});
        let ended = tokio::time::timeout(
            Duration::from_millis(200),
            run_feed_until(feed, std::future::pending()),
        )
        .await
        .unwrap();
        assert!(ended);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_running_feed() {
        let feed = tokio::spawn(std::future::pending::<()>());
        let ended = tokio::time::timeout(Duration::from_millis(200), run_feed_until(feed, async {}))
            .await
            .unwrap();
        assert!(!ended);
    }
}
