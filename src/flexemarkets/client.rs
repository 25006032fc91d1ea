//! Lightweight Flexemarkets REST client.
//!
//! Plain HTTP + serde_json with basic auth. Used once at startup for the
//! marketplace layout and holdings, then by the executor for orders.

use anyhow::{Context, Result};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::messages::OrderResult;
use super::types::{Holdings, Marketplace, Order, RejectReason};
use crate::config::Settings;

pub struct FmClient {
    http: reqwest::Client,
    api_url: Url,
    email: String,
    password: SecretString,
    account: String,
    marketplace_id: u64,
}

#[derive(Debug, Serialize)]
struct PostOrderRequest<'a> {
    account: &'a str,
    #[serde(flatten)]
    order: &'a Order,
}

/// POST /orders response.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl OrderAck {
    pub fn into_result(self, order: Order) -> OrderResult {
        if self.status.eq_ignore_ascii_case("ACCEPTED") {
            OrderResult::Accepted {
                order_id: self.id.unwrap_or_else(|| "unknown".to_string()),
                order,
            }
        } else {
            let code = self.reason.unwrap_or(self.status);
            OrderResult::Rejected {
                order,
                reason: RejectReason::parse(&code),
            }
        }
    }
}

impl FmClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: settings.api_url.clone(),
            email: settings.email.clone(),
            password: SecretString::from(settings.password.expose_secret().to_string()),
            account: settings.account.clone(),
            marketplace_id: settings.marketplace_id,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(&format!("marketplaces/{}/{}", self.marketplace_id, path))
            .map(|mut url| {
                if url.path().ends_with('/') {
                    let trimmed = url.path().trim_end_matches('/').to_string();
                    url.set_path(&trimmed);
                }
                url
            })
            .context("Failed to build endpoint URL")
    }

    /// Marketplace layout: every market with its item and payoff description.
    pub async fn marketplace(&self) -> Result<Marketplace> {
        let url = self.endpoint("")?;
        debug!(%url, "GET marketplace");
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.email, Some(self.password.expose_secret()))
            .send()
            .await
            .context("Failed to request marketplace")?;

        if !resp.status().is_success() {
            anyhow::bail!("Marketplace request returned status: {}", resp.status());
        }
        resp.json().await.context("Failed to parse marketplace")
    }

    pub async fn holdings(&self) -> Result<Holdings> {
        let mut url = self.endpoint("holdings")?;
        url.query_pairs_mut().append_pair("account", &self.account);
        debug!(%url, "GET holdings");
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.email, Some(self.password.expose_secret()))
            .send()
            .await
            .context("Failed to request holdings")?;

        if !resp.status().is_success() {
            anyhow::bail!("Holdings request returned status: {}", resp.status());
        }
        resp.json().await.context("Failed to parse holdings")
    }

    /// Submit a limit order. A business rejection is an `Ok` ack with
    /// status `REJECTED`; only transport failures are errors.
    pub async fn submit_order(&self, order: &Order) -> Result<OrderAck> {
        let url = self.endpoint("orders")?;
        let body = PostOrderRequest {
            account: &self.account,
            order,
        };
        debug!(%url, body = %serde_json::to_string(&body).unwrap_or_default(), "POST order");
        let resp = self
            .http
            .post(url)
            .basic_auth(&self.email, Some(self.password.expose_secret()))
            .json(&body)
            .send()
            .await
            .context("Failed to submit order")?;

        let status = resp.status();
        if status.is_server_error() {
            anyhow::bail!("Order endpoint returned status: {}", status);
        }
        resp.json().await.context("Failed to parse order response")
    }

    /// `Authorization` header value for the feed upgrade request.
    pub fn basic_auth_header(&self) -> String {
        basic_auth_header(&self.email, self.password.expose_secret())
    }
}

pub fn basic_auth_header(email: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{email}:{password}"));
    format!("Basic {token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flexemarkets::types::{Market, OrderRef, OrderSide};
    use serde_json::json;

    fn order() -> Order {
        let market = Market {
            id: 4,
            item: "A".to_string(),
            description: "1".to_string(),
            tick: 1,
        };
        Order::limit(&market, OrderSide::Sell, 40, 1, OrderRef::MainOrder)
    }

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth_header("a@b.c", "pw"), "Basic YUBiLmM6cHc=");
    }

    #[test]
    fn test_ack_accepted() {
        let ack: OrderAck = serde_json::from_value(json!({"id": "o-1", "status": "ACCEPTED"})).unwrap();
        match ack.into_result(order()) {
            OrderResult::Accepted { order_id, order } => {
                assert_eq!(order_id, "o-1");
                assert_eq!(order.price, 40);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ack_rejected_reason() {
        let ack: OrderAck = serde_json::from_value(json!({
            "status": "REJECTED",
            "reason": "ORDER_INSUFFICIENT_ASSETS"
        }))
        .unwrap();
        match ack.into_result(order()) {
            OrderResult::Rejected { reason, .. } => {
                assert_eq!(reason, RejectReason::InsufficientAssets)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_post_order_body_flattens_order() {
        let o = order();
        let body = PostOrderRequest {
            account: "regular-idol",
            order: &o,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["account"], "regular-idol");
        assert_eq!(v["marketId"], 4);
        assert_eq!(v["side"], "SELL");
        assert_eq!(v["units"], 1);
    }

    #[test]
    fn test_marketplace_deserializes() {
        let mp: Marketplace = serde_json::from_value(json!({
            "id": 1181,
            "name": "CAPM",
            "markets": [
                {"id": 1, "item": "A", "description": "10,20"},
                {"id": 2, "item": "Note", "description": "", "tick": 5}
            ]
        }))
        .unwrap();
        assert_eq!(mp.markets.len(), 2);
        assert_eq!(mp.markets[0].tick, 1);
        assert_eq!(mp.markets[1].tick, 5);
    }
}
