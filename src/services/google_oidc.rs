// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OIDC verification for Cloud Tasks fan-out callbacks.
//!
//! Cloud Tasks signs each delivery with an ID token for the API's service
//! account, audience set to the API URL. Google's signing keys are
//! discovered once and cached per the response's `Cache-Control`.

use crate::config::{tasks_service_account_email, Config};
use anyhow::Context;
use axum::http::HeaderValue;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const FALLBACK_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// The caller behind a verified fan-out callback.
#[derive(Debug, Clone)]
pub struct VerifiedTaskPrincipal {
    pub email: String,
    pub subject: String,
}

/// Why a callback token was not accepted.
#[derive(Debug, Clone)]
pub enum OidcError {
    /// Missing or bad token, or claims that do not match. Answer 403.
    Forbidden(String),
    /// Key discovery failed. Answer 500 so Cloud Tasks retries.
    Transient(String),
}

enum KeySource {
    /// Google's published JWKS.
    Google,
    /// One fixed RSA key (tests, local runs).
    Static { kid: String, key: Arc<DecodingKey> },
}

struct CachedKeys {
    by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

struct CachedJwksUri {
    uri: String,
    expires_at: Instant,
}

/// Verifier for the ID tokens Cloud Tasks attaches to fan-out callbacks.
pub struct GoogleOidcVerifier {
    http: reqwest::Client,
    audience: String,
    service_account_email: String,
    source: KeySource,
    jwks_uri: RwLock<Option<CachedJwksUri>>,
    keys: RwLock<Option<CachedKeys>>,
    refresh_lock: Mutex<()>,
}

impl GoogleOidcVerifier {
    /// Verifier backed by Google's published signing keys.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let verifier = Self::with_source(config, KeySource::Google)?;
        tracing::info!(
            audience = %verifier.audience,
            service_account = %verifier.service_account_email,
            "Initialized Cloud Tasks OIDC verifier"
        );
        Ok(verifier)
    }

    /// Verifier that accepts RS256 tokens signed by one known key.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static OIDC kid must not be empty");
        }
        Self::with_source(
            config,
            KeySource::Static {
                kid,
                key: Arc::new(key),
            },
        )
    }

    fn with_source(config: &Config, source: KeySource) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        Ok(Self {
            http,
            audience: config.api_url.trim_end_matches('/').to_string(),
            service_account_email: tasks_service_account_email(&config.gcp_project_id),
            source,
            jwks_uri: RwLock::new(None),
            keys: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Verify the bearer token of a Cloud Tasks callback.
    pub async fn verify_cloud_tasks_token(
        &self,
        auth_header: Option<&HeaderValue>,
    ) -> Result<VerifiedTaskPrincipal, OidcError> {
        let token = bearer_token(auth_header)?;

        let header = decode_header(token)
            .map_err(|e| OidcError::Forbidden(format!("invalid JWT header: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(OidcError::Forbidden(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| OidcError::Forbidden("missing JWT kid".to_string()))?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[self.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<IdTokenClaims>(token, key.as_ref(), &validation)
            .map_err(|e| OidcError::Forbidden(format!("JWT validation failed: {e}")))?
            .claims;

        self.check_principal(claims)
    }

    fn check_principal(&self, claims: IdTokenClaims) -> Result<VerifiedTaskPrincipal, OidcError> {
        match claims.iat {
            None => return Err(OidcError::Forbidden("missing iat claim".to_string())),
            Some(iat) if iat > now_unix_secs() + CLOCK_SKEW_SECS => {
                return Err(OidcError::Forbidden("iat claim is in the future".to_string()));
            }
            Some(_) => {}
        }

        let email = claims
            .email
            .ok_or_else(|| OidcError::Forbidden("missing email claim".to_string()))?;
        if email != self.service_account_email {
            return Err(OidcError::Forbidden(format!(
                "unexpected service account email: {email}"
            )));
        }
        if claims.email_verified != Some(true) {
            return Err(OidcError::Forbidden(
                "email_verified claim is not true".to_string(),
            ));
        }

        Ok(VerifiedTaskPrincipal {
            email,
            subject: claims.sub,
        })
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        if let KeySource::Static {
            kid: static_kid,
            key,
        } = &self.source
        {
            return if kid == static_kid {
                Ok(Arc::clone(key))
            } else {
                Err(OidcError::Forbidden(format!("unknown JWT kid: {kid}")))
            };
        }

        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        // A new kid after key rotation forces one refetch past the cache
        for force in [false, true] {
            self.refresh_keys(force).await?;
            if let Some(key) = self.cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(OidcError::Forbidden(format!(
            "JWT kid not found in JWKS after refresh: {kid}"
        )))
    }

    async fn cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let keys = self.keys.read().await;
        keys.as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .and_then(|cached| cached.by_kid.get(kid))
            .cloned()
    }

    async fn refresh_keys(&self, force: bool) -> Result<(), OidcError> {
        let _guard = self.refresh_lock.lock().await;

        if !force
            && self
                .keys
                .read()
                .await
                .as_ref()
                .is_some_and(|cached| cached.expires_at > Instant::now())
        {
            return Ok(());
        }

        let uri = self.jwks_uri(force).await?;
        tracing::debug!(jwks_uri = %uri, "Refreshing Google JWKS cache");

        let response = self
            .http
            .get(&uri)
            .send()
            .await
            .map_err(|e| OidcError::Transient(format!("JWKS request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(OidcError::Transient(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl(response.headers());
        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| OidcError::Transient(format!("invalid JWKS JSON: {e}")))?;

        let by_kid = usable_keys(jwks);
        if by_kid.is_empty() {
            return Err(OidcError::Transient(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.keys.write().await = Some(CachedKeys {
            by_kid,
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "Google JWKS cache refreshed");
        Ok(())
    }

    async fn jwks_uri(&self, force: bool) -> Result<String, OidcError> {
        let cached = self
            .jwks_uri
            .read()
            .await
            .as_ref()
            .map(|c| (c.uri.clone(), c.expires_at > Instant::now()));

        if let Some((uri, true)) = &cached {
            if !force {
                return Ok(uri.clone());
            }
        }
        let fallback = cached
            .map(|(uri, _)| uri)
            .unwrap_or_else(|| FALLBACK_JWKS_URL.to_string());

        let response = match self.http.get(DISCOVERY_URL).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "OIDC discovery failed, using fallback JWKS URI");
                return Ok(fallback);
            }
            Err(e) => {
                tracing::warn!(error = %e, "OIDC discovery failed, using fallback JWKS URI");
                return Ok(fallback);
            }
        };

        let ttl = cache_ttl(response.headers());
        let discovery: OpenIdConfig = response
            .json()
            .await
            .map_err(|e| OidcError::Transient(format!("invalid discovery JSON: {e}")))?;

        *self.jwks_uri.write().await = Some(CachedJwksUri {
            uri: discovery.jwks_uri.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(discovery.jwks_uri)
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdConfig {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    iat: Option<u64>,
    email: Option<String>,
    email_verified: Option<bool>,
}

/// RS256 signing keys from a JWKS document, by kid.
fn usable_keys(jwks: Jwks) -> HashMap<String, Arc<DecodingKey>> {
    jwks.keys
        .into_iter()
        .filter(|jwk| jwk.kty == "RSA" && !jwk.kid.trim().is_empty())
        .filter(|jwk| jwk.alg.as_deref().is_none_or(|alg| alg == "RS256"))
        .filter(|jwk| jwk.use_.as_deref().is_none_or(|u| u == "sig"))
        .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => Some((jwk.kid, Arc::new(key))),
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
                None
            }
        })
        .collect()
}

fn bearer_token(auth_header: Option<&HeaderValue>) -> Result<&str, OidcError> {
    let value = auth_header
        .ok_or_else(|| OidcError::Forbidden("missing Authorization header".to_string()))?
        .to_str()
        .map_err(|_| OidcError::Forbidden("invalid Authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some("") => Err(OidcError::Forbidden("Bearer token is empty".to_string())),
        Some(token) => Ok(token),
        None => Err(OidcError::Forbidden(
            "Authorization header must be Bearer token".to_string(),
        )),
    }
}

fn cache_ttl(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(max_age)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CACHE_TTL)
}

fn max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse().ok())
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const PRIVATE_PEM: &[u8] = include_bytes!("../../tests/fixtures/tasks_oidc_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../../tests/fixtures/tasks_oidc_public.pem");

    fn verifier() -> GoogleOidcVerifier {
        GoogleOidcVerifier::new_with_static_key(
            &Config::test_default(),
            "k1",
            DecodingKey::from_rsa_pem(PUBLIC_PEM).unwrap(),
        )
        .unwrap()
    }

    fn sign(kid: &str, claims: serde_json::Value) -> HeaderValue {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let token = encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(PRIVATE_PEM).unwrap(),
        )
        .unwrap();
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
    }

    fn claims() -> serde_json::Value {
        let now = now_unix_secs();
        json!({
            "iss": "https://accounts.google.com",
            "aud": "http://localhost:8080",
            "sub": "1234567890",
            "iat": now,
            "exp": now + 600,
            "email": "walkrun-tracker-api@test-project.iam.gserviceaccount.com",
            "email_verified": true,
        })
    }

    #[test]
    fn max_age_parsing() {
        assert_eq!(max_age("public, max-age=3600"), Some(3600));
        assert_eq!(max_age("max-age=\"120\""), Some(120));
        assert_eq!(max_age("public, immutable"), None);
        assert_eq!(max_age("max-age=abc"), None);
    }

    #[test]
    fn bearer_token_errors() {
        assert!(matches!(bearer_token(None), Err(OidcError::Forbidden(_))));
        let basic = HeaderValue::from_static("Basic abc");
        assert!(matches!(bearer_token(Some(&basic)), Err(OidcError::Forbidden(_))));
        let empty = HeaderValue::from_static("Bearer ");
        assert!(matches!(bearer_token(Some(&empty)), Err(OidcError::Forbidden(_))));
    }

    #[tokio::test]
    async fn accepts_service_account_token() {
        let principal = verifier()
            .verify_cloud_tasks_token(Some(&sign("k1", claims())))
            .await
            .unwrap();
        assert_eq!(
            principal.email,
            "walkrun-tracker-api@test-project.iam.gserviceaccount.com"
        );
        assert_eq!(principal.subject, "1234567890");
    }

    #[tokio::test]
    async fn rejects_mismatched_claims() {
        let verifier = verifier();
        let mut cases = Vec::new();

        let mut other_account = claims();
        other_account["email"] = json!("someone@test-project.iam.gserviceaccount.com");
        cases.push(("k1", other_account));

        let mut unverified = claims();
        unverified["email_verified"] = json!(false);
        cases.push(("k1", unverified));

        let mut other_audience = claims();
        other_audience["aud"] = json!("https://elsewhere.example.com");
        cases.push(("k1", other_audience));

        let mut other_issuer = claims();
        other_issuer["iss"] = json!("https://issuer.example.com");
        cases.push(("k1", other_issuer));

        let mut expired = claims();
        expired["exp"] = json!(now_unix_secs() - 3600);
        cases.push(("k1", expired));

        cases.push(("k2", claims()));

        for (kid, claims) in cases {
            let result = verifier
                .verify_cloud_tasks_token(Some(&sign(kid, claims.clone())))
                .await;
            assert!(
                matches!(result, Err(OidcError::Forbidden(_))),
                "accepted {kid} {claims}"
            );
        }
    }

    #[tokio::test]
    async fn rejects_hs256_token() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(),
            &EncodingKey::from_secret(b"test_jwt_key_32_bytes_minimum!!"),
        )
        .unwrap();
        let header = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();

        let result = verifier().verify_cloud_tasks_token(Some(&header)).await;
        assert!(matches!(result, Err(OidcError::Forbidden(_))));
    }
}
