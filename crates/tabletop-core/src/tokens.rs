//! Signed room join tokens
//!
//! Format: `base64url(json payload) "." base64url(hmac_sha256(json payload))`,
//! both parts unpadded. The payload names the room and an expiry in epoch
//! milliseconds.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{TabletopError, TabletopResult, TokenError};
use crate::types::RoomId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTokenPayload {
    pub room_id: RoomId,
    /// Expiry, epoch milliseconds
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl JoinTokenPayload {
    /// Payload expiring `ttl` from now
    pub fn expiring_in(room_id: RoomId, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            room_id,
            exp: now_ms().saturating_add(ttl_ms),
            nonce: None,
        }
    }
}

/// Verification clock and tolerance
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Current time in epoch ms; defaults to the system clock
    pub now_ms: Option<i64>,
    /// Accept tokens up to this long past `exp`
    pub skew_ms: u64,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn mac(secret: &[u8]) -> Result<HmacSha256, hmac::digest::InvalidLength> {
    HmacSha256::new_from_slice(secret)
}

/// Sign `payload` with `secret`
pub fn create_join_token(payload: &JoinTokenPayload, secret: &[u8]) -> TabletopResult<String> {
    let json = serde_json::to_vec(payload)?;
    let mut mac = mac(secret).map_err(|e| TabletopError::Crypto(e.to_string()))?;
    mac.update(&json);
    let signature = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&json),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// Check a token's signature, then its expiry
pub fn verify_join_token(
    token: Option<&str>,
    secret: &[u8],
    options: VerifyOptions,
) -> Result<JoinTokenPayload, TokenError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;
    let (json, signature) = split_and_decode(token)?;

    let mut mac = mac(secret).map_err(|_| TokenError::InvalidSignature)?;
    mac.update(&json);
    mac.verify_slice(&signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    let payload: JoinTokenPayload =
        serde_json::from_slice(&json).map_err(|_| TokenError::InvalidPayload)?;

    let now = options.now_ms.unwrap_or_else(now_ms);
    let skew = i64::try_from(options.skew_ms).unwrap_or(i64::MAX);
    if now > payload.exp.saturating_add(skew) {
        debug!(room_id = %payload.room_id, exp = payload.exp, now, "Join token expired");
        return Err(TokenError::Expired);
    }
    Ok(payload)
}

/// Read a token's payload without checking its signature.
///
/// Only for local bookkeeping (expiry of a token this client was handed).
pub fn peek_payload(token: &str) -> Result<JoinTokenPayload, TokenError> {
    let (json, _) = split_and_decode(token)?;
    serde_json::from_slice(&json).map_err(|_| TokenError::InvalidPayload)
}

fn split_and_decode(token: &str) -> Result<(Vec<u8>, Vec<u8>), TokenError> {
    let mut parts = token.split('.');
    let (Some(body), Some(signature), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(TokenError::InvalidFormat);
    };
    if body.is_empty() || signature.is_empty() {
        return Err(TokenError::InvalidFormat);
    }
    let body = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| TokenError::InvalidEncoding)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::InvalidEncoding)?;
    Ok((body, signature))
}

struct CachedToken {
    token: String,
    exp: i64,
    fetched_at: Instant,
}

/// Reuses a fetched join token while it is fresh
///
/// A cached token is reused while younger than the reuse window and not
/// within the skew margin of its expiry; otherwise a new one is fetched.
pub struct TokenCache {
    cached: Option<CachedToken>,
    reuse_window: Duration,
    expiry_margin_ms: i64,
}

impl TokenCache {
    pub fn new(reuse_window: Duration, expiry_margin: Duration) -> Self {
        Self {
            cached: None,
            reuse_window,
            expiry_margin_ms: i64::try_from(expiry_margin.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// The cached token if it may still be reused
    pub fn fresh(&self) -> Option<&str> {
        let cached = self.cached.as_ref()?;
        let young = cached.fetched_at.elapsed() < self.reuse_window;
        let valid = now_ms().saturating_add(self.expiry_margin_ms) < cached.exp;
        (young && valid).then_some(cached.token.as_str())
    }

    /// Return the cached token or fetch and cache a new one
    pub async fn get_or_fetch<F, Fut>(&mut self, fetch: F) -> TabletopResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TabletopResult<String>>,
    {
        if let Some(token) = self.fresh() {
            return Ok(token.to_string());
        }
        let token = fetch().await?;
        let payload = peek_payload(&token).map_err(TabletopError::Token)?;
        debug!(room_id = %payload.room_id, "Fetched new join token");
        self.cached = Some(CachedToken {
            token: token.clone(),
            exp: payload.exp,
            fetched_at: Instant::now(),
        });
        Ok(token)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}
