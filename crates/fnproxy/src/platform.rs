//! Platform API client
//!
//! Every outbound call the proxy makes to the calling org goes through the
//! [`PlatformClient`] trait: identity introspection, the JWT-bearer token
//! exchange, session permission set activation and the async callback record
//! update. Callers pass complete URLs so the trait stays free of URL policy.

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Grant type of the RFC 7523 token exchange
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Identity introspection endpoint of an org
pub fn userinfo_url(base_url: &str) -> String {
    format!("{}/services/oauth2/userinfo", base_url)
}

/// Token endpoint of an org
pub fn token_url(base_url: &str) -> String {
    format!("{}/services/oauth2/token", base_url)
}

/// Errors from platform calls
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Platform could not be reached
    #[error("{0}")]
    Transport(String),

    /// Platform answered with an unexpected status
    #[error("{status}: {body}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Raw response body
        body: String,
    },

    /// Response body did not match the expected shape
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Transport(e.to_string())
    }
}

/// `/services/oauth2/userinfo` response, reduced to the fields the proxy reads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserInfo {
    /// Org of the token owner
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Token owner
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Token endpoint response, success or OAuth error
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenExchangeResponse {
    /// Issued token
    #[serde(default)]
    pub access_token: Option<String>,
    /// Instance the token is valid for
    #[serde(default)]
    pub instance_url: Option<String>,
    /// OAuth error code
    #[serde(default)]
    pub error: Option<String>,
    /// OAuth error detail
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenExchangeResponse {
    /// `error (error_description)` when the response carries an OAuth error
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_deref().filter(|e| !e.trim().is_empty())?;
        Some(match self.error_description.as_deref() {
            Some(desc) if !desc.trim().is_empty() => format!("{} ({})", error, desc),
            _ => error.to_string(),
        })
    }
}

/// One `activateSessionPermSet` input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermSetActivation {
    /// Permission set API name without namespace
    #[serde(rename = "PermSetName")]
    pub name: String,
    /// Package namespace, when the name was qualified
    #[serde(rename = "PermSetNamespace", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PermSetActivation {
    /// Split `ns__Name` on the first `__`
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once("__") {
            Some((namespace, name)) => Self {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
            },
            None => Self {
                name: qualified.to_string(),
                namespace: None,
            },
        }
    }
}

/// `activateSessionPermSet` action request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivatePermSetRequest {
    /// One input per permission set
    pub inputs: Vec<PermSetActivation>,
}

impl ActivatePermSetRequest {
    /// Build the request for qualified permission set names, keeping their order
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            inputs: names
                .iter()
                .map(|n| PermSetActivation::parse(n.as_ref()))
                .collect(),
        }
    }
}

/// Result of one invocable action input
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Action that ran
    #[serde(default)]
    pub action_name: Option<String>,
    /// Whether the input succeeded
    #[serde(default)]
    pub is_success: bool,
    /// Error list, free form
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

/// Calls into the calling org
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Introspect the identity behind `token`
    async fn user_info(&self, url: &str, token: &str) -> Result<UserInfo, PlatformError>;

    /// Exchange a signed assertion for an access token
    ///
    /// OAuth errors answered with 200 come back as `Ok` with `error` set;
    /// non-success statuses come back as [`PlatformError::Status`].
    async fn exchange_jwt_bearer(
        &self,
        url: &str,
        caller_token: &str,
        assertion: &str,
    ) -> Result<TokenExchangeResponse, PlatformError>;

    /// Run the `activateSessionPermSet` action with the minted token
    async fn activate_session_permission_sets(
        &self,
        url: &str,
        token: &str,
        request: &ActivatePermSetRequest,
    ) -> Result<Vec<ActionResult>, PlatformError>;

    /// Partially update a record; anything but 204 is an error
    async fn update_record(
        &self,
        url: &str,
        token: &str,
        fields: &serde_json::Value,
    ) -> Result<(), PlatformError>;
}

/// [`PlatformClient`] over reqwest
#[derive(Clone)]
pub struct ReqwestPlatformClient {
    http: reqwest::Client,
}

impl ReqwestPlatformClient {
    /// Build a client with rustls and the crate user agent
    pub fn new() -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fnproxy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        expected: fn(StatusCode) -> bool,
    ) -> Result<T, PlatformError> {
        let status = response.status();
        let body = response.text().await?;
        trace!(status = %status, "platform response");
        if !expected(status) {
            return Err(PlatformError::Status { status, body });
        }
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PlatformClient for ReqwestPlatformClient {
    async fn user_info(&self, url: &str, token: &str) -> Result<UserInfo, PlatformError> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        Self::read_json(response, |s| s == StatusCode::OK).await
    }

    async fn exchange_jwt_bearer(
        &self,
        url: &str,
        caller_token: &str,
        assertion: &str,
    ) -> Result<TokenExchangeResponse, PlatformError> {
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", caller_token))
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion),
            ])
            .send()
            .await?;
        Self::read_json(response, |s| s == StatusCode::OK).await
    }

    async fn activate_session_permission_sets(
        &self,
        url: &str,
        token: &str,
        request: &ActivatePermSetRequest,
    ) -> Result<Vec<ActionResult>, PlatformError> {
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(request)
            .send()
            .await?;
        Self::read_json(response, |s| s == StatusCode::OK).await
    }

    async fn update_record(
        &self,
        url: &str,
        token: &str,
        fields: &serde_json::Value,
    ) -> Result<(), PlatformError> {
        let response = self
            .http
            .patch(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(fields)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perm_set_name_splits_on_first_separator() {
        let qualified = PermSetActivation::parse("ns__Custom");
        assert_eq!(qualified.namespace.as_deref(), Some("ns"));
        assert_eq!(qualified.name, "Custom");

        let plain = PermSetActivation::parse("Custom");
        assert!(plain.namespace.is_none());
        assert_eq!(plain.name, "Custom");

        let nested = PermSetActivation::parse("ns__Custom__c");
        assert_eq!(nested.namespace.as_deref(), Some("ns"));
        assert_eq!(nested.name, "Custom__c");
    }

    #[test]
    fn test_activate_request_body_shape() {
        let request = ActivatePermSetRequest::new(&["ns__Custom", "Other"]);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "inputs": [
                    {"PermSetName": "Custom", "PermSetNamespace": "ns"},
                    {"PermSetName": "Other"}
                ]
            })
        );
    }

    #[test]
    fn test_token_error_message_format() {
        let response: TokenExchangeResponse = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"invalid assertion"}"#,
        )
        .unwrap();
        assert_eq!(
            response.error_message().as_deref(),
            Some("invalid_grant (invalid assertion)")
        );

        let bare: TokenExchangeResponse =
            serde_json::from_str(r#"{"error":"invalid_client"}"#).unwrap();
        assert_eq!(bare.error_message().as_deref(), Some("invalid_client"));

        let ok: TokenExchangeResponse =
            serde_json::from_str(r#"{"access_token":"00D!tok","instance_url":"https://x"}"#)
                .unwrap();
        assert!(ok.error_message().is_none());
    }

    #[test]
    fn test_action_result_decodes_platform_shape() {
        let results: Vec<ActionResult> = serde_json::from_str(
            r#"[{"actionName":"activateSessionPermSet","errors":[{"statusCode":"INVALID","message":"no"}],"isSuccess":false,"outputValues":null}]"#,
        )
        .unwrap();
        assert!(!results[0].is_success);
        assert!(results[0].errors.is_some());
    }

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            userinfo_url("https://na1.salesforce.com"),
            "https://na1.salesforce.com/services/oauth2/userinfo"
        );
        assert_eq!(
            token_url("https://na1.salesforce.com"),
            "https://na1.salesforce.com/services/oauth2/token"
        );
    }
}
