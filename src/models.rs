use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== Auth =====

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenReq<'a> {
    pub name: &'a str,
    pub password: &'a str,
    pub app_id: &'a str,
    pub app_version: &'a str,
    pub device_id: &'a str,
    pub cid: i64,
    pub sec: &'a str,
}

/// The platform answers `expirationTime` as either a Unix timestamp or an
/// ISO-8601 string depending on environment; accept both and normalize
/// before anything is stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expiry {
    Unix(f64),
    Iso(String),
}

impl Expiry {
    /// Canonical UTC Unix seconds, or `None` when the ISO form does not
    /// parse.
    pub fn to_unix(&self) -> Option<i64> {
        match self {
            Expiry::Unix(secs) => Some(*secs as i64),
            Expiry::Iso(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()),
        }
    }

    pub fn raw(&self) -> String {
        match self {
            Expiry::Unix(secs) => secs.to_string(),
            Expiry::Iso(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRes {
    pub access_token: String,
    pub expiration_time: Expiry,
}

// ===== Fills =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub action: OrderAction,
    pub contract_id: i64,
    pub qty: i32,
    pub timestamp: DateTime<Utc>,
}

// ===== Contracts =====

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: i64,
    pub name: String,
}

// ===== Orders =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderType {
    Market,
}

/// One outbound replica of a leader fill. Built per fill, submitted once,
/// then dropped; no retry state survives the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOrder {
    pub action: OrderAction,
    pub symbol: String,
    pub qty: i32,
    pub order_type: OrderType,
    pub is_automated: bool,
}

impl MirrorOrder {
    pub fn market(action: OrderAction, symbol: impl Into<String>, qty: i32) -> Self {
        Self {
            action,
            symbol: symbol.into(),
            qty,
            order_type: OrderType::Market,
            is_automated: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderReq<'a> {
    pub account_spec: &'a str,
    pub account_id: i64,
    pub action: OrderAction,
    pub symbol: &'a str,
    pub order_qty: i32,
    pub order_type: OrderType,
    pub is_automated: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub order_id: i64,
}
