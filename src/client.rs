use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::{ApiError, Result};
use crate::mirror::Brokerage;
use crate::models::{
    AccessTokenReq, AccessTokenRes, Contract, Fill, MirrorOrder, OrderAck, PlaceOrderReq,
};

pub const LIVE_BASE: &str = "https://live.tradovateapi.com/v1";
pub const DEMO_BASE: &str = "https://demo.tradovateapi.com/v1";

/// Cached bearer token with its absolute expiry in UTC Unix seconds.
/// Replaced wholesale on every renewal.
#[derive(Clone, Debug)]
struct Session {
    token: String,
    expires_at: i64,
}

impl Session {
    // Usable strictly before the expiry instant.
    fn live_at(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

// Absent and expired collapse to the same answer: renew before use.
fn needs_renewal(session: Option<&Session>, now: i64) -> bool {
    !session.is_some_and(|s| s.live_at(now))
}

// =============== Session client =================
pub struct TvClient {
    api_base: String,
    creds: Credentials,
    http: Client,
    session: RwLock<Option<Session>>,
}

impl TvClient {
    pub fn new(api_base: impl Into<String>, creds: Credentials, http: Client) -> Self {
        Self {
            api_base: api_base.into(),
            creds,
            http,
            session: RwLock::new(None),
        }
    }

    /// Return the cached token while it is still valid; otherwise run the
    /// auth exchange and cache the replacement. Repeated calls under a live
    /// token never touch the network.
    pub async fn access_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        {
            let session = self.session.read().await;
            if !needs_renewal(session.as_ref(), now) {
                if let Some(s) = session.as_ref() {
                    return Ok(s.token.clone());
                }
            }
        }
        self.authenticate().await
    }

    /// Unconditional auth exchange; whatever session was cached is replaced.
    async fn authenticate(&self) -> Result<String> {
        let body = AccessTokenReq {
            name: &self.creds.username,
            password: &self.creds.password,
            app_id: &self.creds.app_id,
            app_version: &self.creds.app_version,
            device_id: &self.creds.device_id,
            cid: self.creds.cid,
            sec: &self.creds.secret,
        };
        let url = format!("{}/auth/accesstokenrequest", self.api_base);
        let resp = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Auth { status, body });
        }
        let res: AccessTokenRes = resp.json().await?;
        let expires_at = res
            .expiration_time
            .to_unix()
            .ok_or_else(|| ApiError::BadExpiry(res.expiration_time.raw()))?;

        info!(
            account = %self.creds.username,
            expires_at,
            "access token renewed"
        );
        *self.session.write().await = Some(Session {
            token: res.access_token.clone(),
            expires_at,
        });
        Ok(res.access_token)
    }

    async fn invalidate_session(&self) {
        *self.session.write().await = None;
    }

    /// Authenticated GET with one forced re-auth on 401, mapping non-success
    /// statuses to `Fetch` with the upstream body attached.
    async fn authed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &'static str,
    ) -> Result<T> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let token = self.access_token().await?;
            let url = format!("{}{}", self.api_base, path);
            let resp = self
                .http
                .get(url)
                .query(query)
                .bearer_auth(&token)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            if resp.status() == StatusCode::UNAUTHORIZED && attempts < 2 {
                self.invalidate_session().await;
                continue;
            }
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ApiError::Fetch { what, status, body });
            }
            return Ok(resp.json().await?);
        }
    }

    /// Every fill the platform knows about, narrowed to those whose age is
    /// at most `window`.
    pub async fn recent_fills(&self, window: Duration) -> Result<Vec<Fill>> {
        let fills: Vec<Fill> = self.authed_get("/fill/list", &[], "fill list").await?;
        Ok(fills_within(fills, Utc::now(), window))
    }

    pub async fn contract_item(&self, contract_id: i64) -> Result<Contract> {
        self.authed_get(
            "/contract/item",
            &[("id", contract_id.to_string())],
            "contract item",
        )
        .await
    }

    /// Submit a market order under this client's own account. Rejections
    /// come back as `ApiError::Order`; the mirror loop treats that as a
    /// per-fill outcome, never a cycle failure.
    pub async fn place_order(&self, order: &MirrorOrder) -> Result<OrderAck> {
        let req = PlaceOrderReq {
            account_spec: &self.creds.username,
            account_id: self.creds.account_id,
            action: order.action,
            symbol: &order.symbol,
            order_qty: order.qty,
            order_type: order.order_type,
            is_automated: order.is_automated,
        };
        let mut attempts = 0;
        loop {
            attempts += 1;
            let token = self.access_token().await?;
            let url = format!("{}/order/placeorder", self.api_base);
            let resp = self
                .http
                .post(url)
                .bearer_auth(&token)
                .header(ACCEPT, "application/json")
                .json(&req)
                .send()
                .await?;
            if resp.status() == StatusCode::UNAUTHORIZED && attempts < 2 {
                self.invalidate_session().await;
                continue;
            }
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(ApiError::Order { status, body });
            }
            // The endpoint has been seen answering 2xx with an ack object,
            // an envelope, or an empty body. Take an orderId wherever it
            // appears; otherwise report a zero id rather than failing a
            // placement that the platform accepted.
            if let Ok(v) = serde_json::from_str::<Value>(&body) {
                if let Some(oid) = v
                    .get("orderId")
                    .and_then(|x| x.as_i64())
                    .or_else(|| v.get("data").and_then(|d| d.get("orderId")).and_then(|x| x.as_i64()))
                {
                    return Ok(OrderAck { order_id: oid });
                }
            }
            debug!("placeorder: 2xx without orderId in body: {:?}", body);
            return Ok(OrderAck { order_id: 0 });
        }
    }
}

#[async_trait]
impl Brokerage for TvClient {
    async fn recent_fills(&self, window: Duration) -> Result<Vec<Fill>> {
        TvClient::recent_fills(self, window).await
    }

    async fn contract_item(&self, contract_id: i64) -> Result<Contract> {
        TvClient::contract_item(self, contract_id).await
    }

    async fn place_order(&self, order: &MirrorOrder) -> Result<OrderAck> {
        TvClient::place_order(self, order).await
    }
}

/// Keep fills whose age relative to `now` is at most `window`, boundary
/// inclusive. Fills timestamped in the future pass as well.
fn fills_within(fills: Vec<Fill>, now: DateTime<Utc>, window: Duration) -> Vec<Fill> {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    fills.into_iter().filter(|f| now - f.timestamp <= window).collect()
}
