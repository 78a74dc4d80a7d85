//! Worker credential minting
//!
//! Mints a short-lived access token for the invoking user through the RFC 7523
//! JWT-bearer exchange: the proxy signs an assertion with the connected app's
//! private key (issuer = consumer key, subject = username) and trades it at
//! the org's token endpoint. The resulting token is what the worker uses to
//! call back into the org, so it carries only the connected app's scopes.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::context::{CallerOrg, MintedCredential};
use crate::error::{Error, Result};
use crate::platform::{token_url, PlatformClient, PlatformError, TokenExchangeResponse};

/// Audience for sandbox and scratch orgs
pub const SANDBOX_AUDIENCE: &str = "https://test.salesforce.com";
/// Audience for production orgs
pub const PRODUCTION_AUDIENCE: &str = "https://login.salesforce.com";
/// Lifetime of a signed assertion
pub const ASSERTION_TTL: Duration = Duration::from_secs(360);

/// Pick the assertion audience for a token endpoint
///
/// An explicit override always wins; otherwise sandbox and scratch hosts get
/// the sandbox audience.
pub fn resolve_audience<'a>(audience_override: Option<&'a str>, token_url: &str) -> &'a str {
    match audience_override {
        Some(audience) => audience,
        None if token_url.contains(".sandbox.") || token_url.contains(".scratch.") => {
            SANDBOX_AUDIENCE
        }
        None => PRODUCTION_AUDIENCE,
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: i64,
}

/// Signs assertions and exchanges them for worker tokens
pub struct CredentialMinter {
    platform: Arc<dyn PlatformClient>,
    issuer: String,
    key: EncodingKey,
    algorithm: Algorithm,
    audience: Option<String>,
}

impl CredentialMinter {
    /// Build a minter from the connected app settings
    pub fn from_config(config: &ProxyConfig, platform: Arc<dyn PlatformClient>) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes())?;
        Ok(Self::with_key(
            config.consumer_key.clone(),
            key,
            Algorithm::RS256,
            config.audience.clone(),
            platform,
        ))
    }

    /// Build a minter around an already parsed key
    pub fn with_key(
        issuer: impl Into<String>,
        key: EncodingKey,
        algorithm: Algorithm,
        audience: Option<String>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            platform,
            issuer: issuer.into(),
            key,
            algorithm,
            audience,
        }
    }

    /// Sign an assertion for `username`, valid from `now` (epoch seconds)
    pub fn assertion(&self, username: &str, audience: &str, now: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.issuer,
            sub: username,
            aud: audience,
            exp: now + ASSERTION_TTL.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(|e| Error::Internal(format!("unable to sign assertion: {}", e)))
    }

    /// Mint a worker token for the calling user
    ///
    /// Every failure is a 401 naming the reason.
    pub async fn mint(
        &self,
        request_id: &str,
        caller_token: &str,
        org: &CallerOrg,
    ) -> Result<MintedCredential> {
        let url = token_url(&org.org_api_base_url);
        let audience = resolve_audience(self.audience.as_deref(), &url);
        debug!(request_id = %request_id, audience = %audience, "signing token exchange assertion");

        let assertion = self
            .assertion(&org.username, audience, chrono::Utc::now().timestamp())
            .map_err(|e| mint_failure(request_id, &e.to_string(), &org.username))?;

        let response = match self
            .platform
            .exchange_jwt_bearer(&url, caller_token, &assertion)
            .await
        {
            Ok(response) => response,
            Err(PlatformError::Status { status, body }) => {
                // OAuth errors usually arrive as 400 with an error body
                let message = serde_json::from_str::<TokenExchangeResponse>(&body)
                    .ok()
                    .and_then(|r| r.error_message())
                    .unwrap_or_else(|| format!("{} {}", status, body));
                return Err(mint_failure(request_id, &message, &org.username));
            }
            Err(e) => return Err(mint_failure(request_id, &e.to_string(), &org.username)),
        };

        if let Some(message) = response.error_message() {
            return Err(mint_failure(request_id, &message, &org.username));
        }

        let token = response
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| mint_failure(request_id, "no access token returned", &org.username))?;

        info!(request_id = %request_id, "minted function token");
        Ok(MintedCredential::new(token))
    }
}

fn mint_failure(request_id: &str, reason: &str, username: &str) -> Error {
    let mut message = format!("Unable to mint function token: {}", reason);
    if reason.contains("invalid_app_access")
        || reason.contains("user hasn't approved this consumer")
    {
        message.push_str(&format!(
            ". Ensure that the target Connected App is set to \"Admin approved users are pre-authorized\" and user {} is assigned to Connected App via a Permission Set",
            username
        ));
    }
    Error::unauthorized(request_id, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatformClient;
    use axum::http::StatusCode;
    use jsonwebtoken::{DecodingKey, Validation};

    const SECRET: &[u8] = b"test-signing-secret";

    fn org() -> CallerOrg {
        CallerOrg {
            api_version: "57.0".into(),
            org_id: "00Dxx0000006IYJEA2".into(),
            username: "admin@example.com".into(),
            org_domain_url: "https://acme.my.salesforce.com".into(),
            org_api_base_url: "https://acme.my.salesforce.com".into(),
            namespace: None,
        }
    }

    fn minter(platform: MockPlatformClient, audience: Option<&str>) -> CredentialMinter {
        CredentialMinter::with_key(
            "3MVG9-consumer",
            EncodingKey::from_secret(SECRET),
            Algorithm::HS256,
            audience.map(String::from),
            Arc::new(platform),
        )
    }

    #[derive(Debug, serde::Deserialize)]
    struct Decoded {
        iss: String,
        sub: String,
        aud: String,
        exp: i64,
    }

    #[test]
    fn test_resolve_audience() {
        assert_eq!(
            resolve_audience(
                None,
                "https://acme--dev.sandbox.my.salesforce.com/services/oauth2/token"
            ),
            SANDBOX_AUDIENCE
        );
        assert_eq!(
            resolve_audience(
                None,
                "https://site-1.scratch.my.salesforce.com/services/oauth2/token"
            ),
            SANDBOX_AUDIENCE
        );
        assert_eq!(
            resolve_audience(None, "https://acme.my.salesforce.com/services/oauth2/token"),
            PRODUCTION_AUDIENCE
        );
        assert_eq!(
            resolve_audience(
                Some("https://custom.example.com"),
                "https://acme--dev.sandbox.my.salesforce.com"
            ),
            "https://custom.example.com"
        );
    }

    #[test]
    fn test_assertion_claims() {
        let minter = minter(MockPlatformClient::new(), None);
        let jwt = minter
            .assertion("admin@example.com", PRODUCTION_AUDIENCE, 1_700_000_000)
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[PRODUCTION_AUDIENCE]);
        validation.validate_exp = false;
        let decoded =
            jsonwebtoken::decode::<Decoded>(&jwt, &DecodingKey::from_secret(SECRET), &validation)
                .unwrap()
                .claims;

        assert_eq!(decoded.iss, "3MVG9-consumer");
        assert_eq!(decoded.sub, "admin@example.com");
        assert_eq!(decoded.aud, PRODUCTION_AUDIENCE);
        assert_eq!(decoded.exp, 1_700_000_360);
    }

    #[tokio::test]
    async fn test_mint_returns_exchanged_token() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_exchange_jwt_bearer()
            .withf(|url, caller, assertion| {
                url == "https://acme.my.salesforce.com/services/oauth2/token"
                    && caller == "caller-token"
                    && !assertion.is_empty()
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(TokenExchangeResponse {
                    access_token: Some("00D!minted".into()),
                    ..Default::default()
                })
            });

        let credential = minter(platform, None)
            .mint("req-1", "caller-token", &org())
            .await
            .unwrap();
        assert_eq!(credential.expose(), "00D!minted");
    }

    #[tokio::test]
    async fn test_mint_oauth_error_adds_guidance() {
        let mut platform = MockPlatformClient::new();
        platform.expect_exchange_jwt_bearer().returning(|_, _, _| {
            Err(PlatformError::Status {
                status: StatusCode::BAD_REQUEST,
                body: r#"{"error":"invalid_app_access","error_description":"user is not admin approved to access this app"}"#.into(),
            })
        });

        let err = minter(platform, None)
            .mint("req-1", "caller-token", &org())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let message = err.to_string();
        assert!(message.starts_with("Unable to mint function token: invalid_app_access ("));
        assert!(message.contains("user admin@example.com is assigned to Connected App"));
    }

    #[tokio::test]
    async fn test_mint_error_in_success_body() {
        let mut platform = MockPlatformClient::new();
        platform.expect_exchange_jwt_bearer().returning(|_, _, _| {
            Ok(TokenExchangeResponse {
                error: Some("invalid_grant".into()),
                error_description: Some("invalid assertion".into()),
                ..Default::default()
            })
        });

        let err = minter(platform, None)
            .mint("req-1", "caller-token", &org())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            err.to_string(),
            "Unable to mint function token: invalid_grant (invalid assertion)"
        );
    }

    #[tokio::test]
    async fn test_mint_transport_failure_is_unauthorized() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_exchange_jwt_bearer()
            .returning(|_, _, _| Err(PlatformError::Transport("connection refused".into())));

        let err = minter(platform, None)
            .mint("req-1", "caller-token", &org())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.request_id(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_mint_missing_token_is_unauthorized() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_exchange_jwt_bearer()
            .returning(|_, _, _| Ok(TokenExchangeResponse::default()));

        let err = minter(platform, None)
            .mint("req-1", "caller-token", &org())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
