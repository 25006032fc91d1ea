//! Marketplace WebSocket feed.
//!
//! Connects to the marketplace channel with basic auth, subscribes to
//! session, order book and holdings updates, and fans them out:
//!
//!   WS ──session / orderBook──→ MarketEvent ──→ CapmAgent
//!   WS ──holdings────────────→ Holdings    ──→ HoldingsManager
//!
//! Reconnects on disconnect.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::messages::MarketEvent;
use super::types::{BookTop, Holdings, MarketId, Price};

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: Url,
    /// Value of the `Authorization` header on the upgrade request.
    pub auth_header: String,
    pub account: String,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
}

impl FeedConfig {
    pub fn new(url: Url, auth_header: String, account: String) -> Self {
        Self {
            url,
            auth_header,
            account,
            reconnect_delay: Duration::from_secs(3),
            ping_interval: Duration::from_secs(10),
        }
    }
}

/// A parsed feed message, routed by kind.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Market(MarketEvent),
    Holdings(Holdings),
}

pub struct MarketFeed {
    cfg: FeedConfig,
    market_tx: mpsc::Sender<MarketEvent>,
    holdings_tx: mpsc::Sender<Holdings>,
}

impl MarketFeed {
    pub fn new(
        cfg: FeedConfig,
        market_tx: mpsc::Sender<MarketEvent>,
        holdings_tx: mpsc::Sender<Holdings>,
    ) -> Self {
        Self {
            cfg,
            market_tx,
            holdings_tx,
        }
    }

    /// Runs until both downstream channels are closed.
    pub async fn run(self) {
        info!("📡 MarketFeed started | url={}", self.cfg.url);

        loop {
            match self.connect_and_listen().await {
                Ok(()) => info!("📡 Feed connection closed"),
                Err(e) => warn!("📡 Feed error: {:?}", e),
            }

            if self.market_tx.is_closed() && self.holdings_tx.is_closed() {
                break;
            }

            info!(
                "📡 Reconnecting feed in {}s...",
                self.cfg.reconnect_delay.as_secs()
            );
            sleep(self.cfg.reconnect_delay).await;
        }

        info!("📡 MarketFeed shutting down");
    }

    async fn connect_and_listen(&self) -> anyhow::Result<()> {
        let mut request = self.cfg.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&self.cfg.auth_header)?);

        let (ws, response) =
            match tokio::time::timeout(Duration::from_secs(10), connect_async(request)).await {
                Ok(Ok((ws, resp))) => (ws, resp),
                Ok(Err(e)) => anyhow::bail!("WS connect error: {:?}", e),
                Err(_) => anyhow::bail!("WS connection timeout"),
            };

        info!("✅ Feed connected (status={:?})", response.status());
        let (mut write, mut read) = ws.split();

        let subscribe = json!({
            "type": "subscribe",
            "account": self.cfg.account,
            "channels": ["session", "orderBook", "holdings"],
        });
        debug!("📡 Subscribe payload: {}", subscribe);
        write.send(Message::Text(subscribe.to_string())).await?;

        let ping_interval = self.cfg.ping_interval;
        let keepalive = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            loop {
                interval.tick().await;
                if write.send(Message::Text("PING".to_string())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    for event in parse_feed_text(&text) {
                        if !self.dispatch(event).await {
                            keepalive.abort();
                            return Ok(());
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    warn!("📡 Feed closed by server");
                    break;
                }
                Err(e) => {
                    warn!("📡 Feed read error: {:?}", e);
                    break;
                }
                _ => {}
            }
        }

        keepalive.abort();
        Ok(())
    }

    /// Returns false once downstream is gone.
    async fn dispatch(&self, event: FeedEvent) -> bool {
        match event {
            FeedEvent::Market(ev) => self.market_tx.send(ev).await.is_ok(),
            FeedEvent::Holdings(h) => self.holdings_tx.send(h).await.is_ok(),
        }
    }
}

/// Parse one text frame. Frames may carry a single event or a batch array.
pub fn parse_feed_text(text: &str) -> Vec<FeedEvent> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(v) => v,
        Err(_) => {
            debug!("📡 Ignoring non-JSON frame: {}", text);
            return vec![];
        }
    };
    match value {
        Value::Array(values) => values.iter().filter_map(parse_feed_event).collect(),
        v => parse_feed_event(&v).into_iter().collect(),
    }
}

pub fn parse_feed_event(val: &Value) -> Option<FeedEvent> {
    let event_type = val
        .get("type")
        .or_else(|| val.get("event_type"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    if event_type.eq_ignore_ascii_case("session") {
        let is_open = val
            .get("isOpen")
            .or_else(|| val.get("is_open"))
            .and_then(|v| v.as_bool())?;
        return Some(FeedEvent::Market(MarketEvent::Session { is_open }));
    }

    if event_type.eq_ignore_ascii_case("orderBook") || event_type.eq_ignore_ascii_case("book") {
        let market_id = val
            .get("marketId")
            .or_else(|| val.get("market_id"))
            .and_then(parse_market_id)?;

        // Levels are not guaranteed to be sorted.
        let best_bid = levels(val, "bids").max();
        let best_ask = levels(val, "asks").min();
        let last_price = val
            .get("lastPrice")
            .or_else(|| val.get("last_price"))
            .and_then(parse_price);

        return Some(FeedEvent::Market(MarketEvent::Book {
            market_id,
            book: BookTop::new(best_bid, best_ask, last_price),
            ts: Instant::now(),
        }));
    }

    if event_type.eq_ignore_ascii_case("holdings") {
        return match serde_json::from_value::<Holdings>(val.clone()) {
            Ok(h) => Some(FeedEvent::Holdings(h)),
            Err(e) => {
                warn!("📡 Malformed holdings event: {}", e);
                None
            }
        };
    }

    debug!("📡 Ignoring event type '{}'", event_type);
    None
}

/// Prices of resting levels with units left.
fn levels<'a>(val: &'a Value, field: &str) -> impl Iterator<Item = Price> + 'a {
    val.get(field)
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter(|lvl| {
            lvl.get("units")
                .and_then(|u| u.as_i64())
                .map_or(true, |u| u > 0)
        })
        .filter_map(|lvl| lvl.get("price").and_then(parse_price))
}

/// Integer cents, as number or string.
fn parse_price(v: &Value) -> Option<Price> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<Price>().ok()))
        .filter(|p| *p > 0)
}

fn parse_market_id(v: &Value) -> Option<MarketId> {
    v.as_u64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<MarketId>().ok()))
}
