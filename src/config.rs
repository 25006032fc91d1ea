//! Connection settings for the marketplace account.
//!
//! Strategy and actor tunables live next to the component that uses them
//! (`StrategyConfig`, `CoordinatorConfig`, ...). This file only covers the
//! credentials and endpoints.

use std::env;

use anyhow::{bail, Context};
use secrecy::SecretString;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.flexemarkets.com";
pub const DEFAULT_WS_URL: &str = "wss://api.flexemarkets.com/ws";

#[derive(Debug)]
pub struct Settings {
    pub email: String,
    pub password: SecretString,
    pub account: String,
    pub marketplace_id: u64,
    pub api_url: Url,
    pub ws_url: Url,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let email = required("FM_EMAIL")?;
        let password = SecretString::from(required("FM_PASSWORD")?);
        let account = required("FM_ACCOUNT")?;
        let marketplace_id = required("FM_MARKETPLACE_ID")?
            .parse::<u64>()
            .context("FM_MARKETPLACE_ID must be a positive integer")?;

        let api_url = env::var("FM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let ws_url = env::var("FM_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.into());

        Ok(Self {
            email,
            password,
            account,
            marketplace_id,
            api_url: base_url(&api_url).context("invalid FM_API_URL")?,
            ws_url: base_url(&ws_url).context("invalid FM_WS_URL")?,
        })
    }

    /// Feed endpoint for the configured marketplace.
    pub fn feed_url(&self) -> anyhow::Result<Url> {
        self.ws_url
            .join(&format!("marketplaces/{}", self.marketplace_id))
            .context("failed to build feed URL")
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => bail!("{key} is not set"),
    }
}

/// Parse a base URL and make sure relative joins append to its path.
pub fn base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
