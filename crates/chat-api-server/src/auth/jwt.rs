use anyhow::{anyhow, Context, Result};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::IdentityConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Failed to fetch signing keys: {0}")]
    KeyFetch(String),
}

/// Subset of a Firebase ID token's claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Firebase uid
    pub aud: String,
    pub iss: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedIdentity {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Service-account credential; only the project id matters for verification
#[derive(Debug, Deserialize)]
struct ServiceAccount {
    project_id: String,
}

/// Checks bearer ID tokens issued by the identity provider.
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

/// Verifies Firebase Authentication ID tokens against Google's published JWKs.
pub struct FirebaseVerifier {
    project_id: String,
    algorithm: Algorithm,
    client: Client,
    jwks_url: String,
    cache_ttl: Duration,
    keys: RwLock<Option<CachedKeys>>,
}

impl FirebaseVerifier {
    /// Build from the service-account JSON credential.
    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        let raw = config
            .credentials_json
            .as_deref()
            .ok_or_else(|| anyhow!("identity credentials not configured"))?;
        let account: ServiceAccount =
            serde_json::from_str(raw).context("identity credentials are not valid service-account JSON")?;
        if account.project_id.trim().is_empty() {
            return Err(anyhow!("identity credentials have an empty project_id"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        info!("Identity verifier ready for project {}", account.project_id);

        Ok(Self {
            project_id: account.project_id,
            algorithm: Algorithm::RS256,
            client,
            jwks_url: config.jwks_url.clone(),
            cache_ttl: Duration::from_secs(config.jwks_cache_secs.max(1)),
            keys: RwLock::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn cached_key(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.keys.read();
        let cached = guard.as_ref()?;
        if cached.fetched_at.elapsed() > self.cache_ttl {
            return None;
        }
        cached.set.find(kid).and_then(|jwk| DecodingKey::from_jwk(jwk).ok())
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        debug!("Fetching signing keys from {}", self.jwks_url);
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyFetch(format!("status {}", response.status())));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        *self.keys.write() = Some(CachedKeys { set, fetched_at: Instant::now() });
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cached_key(kid) {
            return Ok(key);
        }

        // Unknown kid or stale cache: keys rotate, so refetch once
        self.refresh_keys().await?;
        self.cached_key(kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key {}", kid)))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token header has no kid".to_string()))?;

        let key = self.key_for(&kid).await?;
        let data = decode::<Claims>(token, &key, &self.validation())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        Ok(VerifiedIdentity {
            uid: data.claims.sub,
            email: data.claims.email,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::Engine;
    use jsonwebtoken::{encode, EncodingKey, Header};

    // 36 bytes: encodes identically in the standard and URL-safe alphabets, unpadded
    const SECRET: &[u8] = b"chatrelaytestsigningsecret0123456789";

    /// Verifier with a pre-loaded HMAC key so tests never hit the network.
    pub(crate) fn test_verifier(project_id: &str) -> FirebaseVerifier {
        let k = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(SECRET);
        let set: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{ "kty": "oct", "kid": "k1", "k": k }]
        }))
        .unwrap();

        FirebaseVerifier {
            project_id: project_id.to_string(),
            algorithm: Algorithm::HS256,
            client: Client::new(),
            jwks_url: "http://127.0.0.1:9/jwks".to_string(),
            cache_ttl: Duration::from_secs(3600),
            keys: RwLock::new(Some(CachedKeys { set, fetched_at: Instant::now() })),
        }
    }

    pub(crate) fn sign(project_id: &str, sub: &str, kid: &str, exp_offset_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            aud: project_id.to_string(),
            iss: format!("https://securetoken.google.com/{}", project_id),
            exp: (now + exp_offset_secs) as usize,
            email: Some("user@example.com".to_string()),
        };
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_yields_uid() {
        let verifier = test_verifier("demo-project");
        let token = sign("demo-project", "uid-123", "k1", 3600);

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.uid, "uid-123");
        assert_eq!(identity.email.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn test_wrong_audience_is_rejected() {
        let verifier = test_verifier("demo-project");
        let token = sign("other-project", "uid-123", "k1", 3600);

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let verifier = test_verifier("demo-project");
        let token = sign("demo-project", "uid-123", "k1", -3600);

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_garbage_and_empty_tokens() {
        let verifier = test_verifier("demo-project");
        assert!(matches!(verifier.verify("   ").await, Err(AuthError::MissingToken)));
        assert!(matches!(verifier.verify("not.a.jwt").await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_refresh() {
        let verifier = test_verifier("demo-project");
        let token = sign("demo-project", "uid-123", "rotated", 3600);

        // Refresh endpoint is unreachable, so the lookup surfaces a key fetch failure
        assert!(matches!(verifier.verify(&token).await, Err(AuthError::KeyFetch(_))));
    }

    #[test]
    fn test_from_config_requires_project_id() {
        let mut config = crate::config::Settings::defaults().unwrap().identity;
        config.credentials_json = Some(r#"{"type":"service_account"}"#.to_string());
        assert!(FirebaseVerifier::from_config(&config).is_err());

        config.credentials_json = Some(r#"{"type":"service_account","project_id":"demo"}"#.to_string());
        let verifier = FirebaseVerifier::from_config(&config).unwrap();
        assert_eq!(verifier.project_id(), "demo");
        assert_eq!(verifier.issuer(), "https://securetoken.google.com/demo");
    }
}
