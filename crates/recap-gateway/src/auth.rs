//! Request authentication: opaque API keys and HS256 bearer tokens.
//!
//! API keys map to configured principals (inline table or a JSON file).
//! Bearer tokens are verified against the configured signing secret with
//! expiry enforcement. No third-party JWT crate: the token is three
//! base64url segments and an HMAC-SHA256 over the first two.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use recap_core::config::{GatewayConfig, PrincipalConfig};
use recap_core::{RecapError, Result};

type HmacSha256 = Hmac<Sha256>;

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    /// Guilds this principal may touch. Empty means all.
    pub guilds: Vec<String>,
}

impl Principal {
    pub fn may_access_guild(&self, guild_id: &str) -> bool {
        self.guilds.is_empty() || self.guilds.iter().any(|g| g == guild_id)
    }
}

pub struct Authenticator {
    api_keys: HashMap<String, PrincipalConfig>,
    jwt_secret: Option<String>,
}

impl Authenticator {
    /// Build from config, merging the optional JSON key file over the
    /// inline table.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut api_keys = config.api_keys.clone();
        if let Some(ref path) = config.api_key_file {
            let text = std::fs::read_to_string(path).map_err(|e| {
                RecapError::Config(format!("cannot read api key file {path}: {e}"))
            })?;
            let from_file: HashMap<String, PrincipalConfig> = serde_json::from_str(&text)
                .map_err(|e| RecapError::Config(format!("bad api key file {path}: {e}")))?;
            api_keys.extend(from_file);
        }
        Ok(Self {
            api_keys,
            jwt_secret: config.jwt_secret.clone(),
        })
    }

    /// Resolve the caller from `X-API-Key` or `Authorization: Bearer`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal> {
        if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
            return self.check_api_key(key);
        }
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            let token = auth.strip_prefix("Bearer ").ok_or_else(|| {
                RecapError::AuthFailed("Authorization header must use Bearer scheme".to_string())
            })?;
            return self.check_bearer(token);
        }
        Err(RecapError::AuthFailed(
            "missing X-API-Key or Authorization header".to_string(),
        ))
    }

    fn check_api_key(&self, presented: &str) -> Result<Principal> {
        // Constant-time scan over the whole table so a miss costs the same
        // as a hit.
        let mut found: Option<&PrincipalConfig> = None;
        for (key, principal) in &self.api_keys {
            if constant_time_eq(key.as_bytes(), presented.as_bytes()) {
                found = Some(principal);
            }
        }
        match found {
            Some(p) => Ok(Principal {
                name: p.name.clone(),
                guilds: p.guilds.clone(),
            }),
            None => Err(RecapError::AuthFailed("unknown API key".to_string())),
        }
    }

    fn check_bearer(&self, token: &str) -> Result<Principal> {
        let secret = self.jwt_secret.as_deref().ok_or_else(|| {
            RecapError::AuthFailed("bearer authentication is not configured".to_string())
        })?;

        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
            _ => return Err(RecapError::AuthFailed("malformed bearer token".to_string())),
        };

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| RecapError::AuthFailed("invalid signing secret".to_string()))?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        let expected = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| RecapError::AuthFailed("bad token signature encoding".to_string()))?;
        mac.verify_slice(&expected)
            .map_err(|_| RecapError::AuthFailed("token signature mismatch".to_string()))?;

        let claims: serde_json::Value = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| RecapError::AuthFailed("bad token payload".to_string()))?;

        if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
            if chrono::Utc::now().timestamp() >= exp {
                return Err(RecapError::AuthFailed("token expired".to_string()));
            }
        } else {
            return Err(RecapError::AuthFailed("token missing expiry".to_string()));
        }

        let name = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .unwrap_or("bearer")
            .to_string();
        let guilds = claims
            .get("guilds")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|g| g.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Principal { name, guilds })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Sliding-window rate limiter keyed by principal name.
pub struct PrincipalLimiter {
    window: Duration,
    limit: usize,
    state: std::sync::Mutex<HashMap<String, std::collections::VecDeque<Instant>>>,
}

impl PrincipalLimiter {
    pub fn new(limit_per_minute: usize) -> Self {
        Self {
            window: Duration::from_secs(60),
            limit: limit_per_minute.max(1),
            state: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, principal: &str) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let queue = state.entry(principal.to_string()).or_default();

        while let Some(front) = queue.front() {
            if now.duration_since(*front) >= self.window {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.limit {
            let oldest = *queue.front().expect("non-empty at limit");
            let retry = self.window.saturating_sub(now.duration_since(oldest));
            warn!(principal, "REST rate limit exceeded");
            return Err(RecapError::RateLimited {
                retry_after_secs: retry.as_secs().max(1),
            });
        }
        queue.push_back(now);
        Ok(())
    }
}

/// Mint an HS256 token, used by operators and the test suite.
pub fn sign_token(secret: &str, claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("any key length works");
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{header}.{payload}.{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authenticator(secret: Option<&str>) -> Authenticator {
        let mut config = GatewayConfig::default();
        config.jwt_secret = secret.map(String::from);
        config.api_keys.insert(
            "key-abc".to_string(),
            PrincipalConfig {
                name: "ci-bot".to_string(),
                guilds: vec!["guild-1".to_string()],
            },
        );
        Authenticator::from_config(&config).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn api_key_resolves_principal() {
        let auth = authenticator(None);
        let principal = auth
            .authenticate(&headers(&[("x-api-key", "key-abc")]))
            .unwrap();
        assert_eq!(principal.name, "ci-bot");
        assert!(principal.may_access_guild("guild-1"));
        assert!(!principal.may_access_guild("guild-2"));
    }

    #[test]
    fn unknown_key_and_missing_headers_fail() {
        let auth = authenticator(None);
        assert!(auth
            .authenticate(&headers(&[("x-api-key", "nope")]))
            .is_err());
        assert!(auth.authenticate(&HeaderMap::new()).is_err());
    }

    #[test]
    fn bearer_round_trip_with_expiry() {
        let auth = authenticator(Some("s3cret"));
        let future = chrono::Utc::now().timestamp() + 600;
        let token = sign_token(
            "s3cret",
            &json!({"sub": "svc", "exp": future, "guilds": ["guild-9"]}),
        );
        let principal = auth
            .authenticate(&headers(&[(
                "authorization",
                &format!("Bearer {token}"),
            )]))
            .unwrap();
        assert_eq!(principal.name, "svc");
        assert!(principal.may_access_guild("guild-9"));

        // Expired token fails.
        let past = chrono::Utc::now().timestamp() - 10;
        let stale = sign_token("s3cret", &json!({"sub": "svc", "exp": past}));
        assert!(auth
            .authenticate(&headers(&[("authorization", &format!("Bearer {stale}"))]))
            .is_err());

        // Wrong secret fails.
        let forged = sign_token("other", &json!({"sub": "svc", "exp": future}));
        assert!(auth
            .authenticate(&headers(&[("authorization", &format!("Bearer {forged}"))]))
            .is_err());
    }

    #[test]
    fn principal_limiter_enforces_the_window() {
        let limiter = PrincipalLimiter::new(2);
        assert!(limiter.check("p1").is_ok());
        assert!(limiter.check("p1").is_ok());
        let err = limiter.check("p1").unwrap_err();
        assert!(matches!(err, RecapError::RateLimited { .. }));
        // Other principals are unaffected.
        assert!(limiter.check("p2").is_ok());
    }
}
