//! Per-request invocation context
//!
//! The platform describes each invocation with two base64-encoded JSON headers:
//!
//! - `ce-sffncontext`: the function request ([`FunctionContext`])
//! - `ce-sfcontext`: the calling org and user ([`OrgContext`])
//!
//! The function context travels on to the worker after the proxy has added the
//! minted access token, so unknown fields are kept verbatim. The org context is
//! only read by the proxy and is narrowed into a validated [`CallerOrg`].

use std::fmt;

use axum::http::{HeaderMap, Method};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Correlation id supplied by the caller
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Function request context header
pub const HEADER_FUNCTION_CONTEXT: &str = "ce-sffncontext";
/// Org/user context header
pub const HEADER_ORG_CONTEXT: &str = "ce-sfcontext";
/// Worker response header carried into the async callback record
pub const HEADER_EXTRA_INFO: &str = "x-extra-info";
/// Org id presented by health check callers
pub const HEADER_ORG_ID_18: &str = "x-org-id-18";
/// Marker header telling the worker a request is a health check
pub const HEADER_HEALTH_CHECK: &str = "x-health-check";

/// Wire value of a synchronous invocation
pub const INVOCATION_TYPE_SYNC: &str = "com.salesforce.function.invoke.sync";
/// Wire value of an asynchronous invocation
pub const INVOCATION_TYPE_ASYNC: &str = "com.salesforce.function.invoke.async";

/// How the caller waits for the function result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Caller waits for the worker response
    Sync,
    /// Caller is acknowledged immediately; the result goes to a callback record
    Async,
}

impl InvocationType {
    /// Parse the wire value used in `ce-sffncontext`
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            INVOCATION_TYPE_SYNC => Some(InvocationType::Sync),
            INVOCATION_TYPE_ASYNC => Some(InvocationType::Async),
            _ => None,
        }
    }

    /// Wire value used in `ce-sffncontext`
    pub fn as_wire(&self) -> &'static str {
        match self {
            InvocationType::Sync => INVOCATION_TYPE_SYNC,
            InvocationType::Async => INVOCATION_TYPE_ASYNC,
        }
    }
}

/// Access token minted for the worker
///
/// Serialized as a plain string inside the function context; never printed.
#[derive(Clone, PartialEq)]
pub struct MintedCredential(Zeroizing<String>);

impl MintedCredential {
    /// Wrap a freshly minted token
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    /// Raw token for an outbound `Authorization` header
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for MintedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MintedCredential(<redacted>)")
    }
}

impl Serialize for MintedCredential {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for MintedCredential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(MintedCredential::new)
    }
}

/// Function request context carried in `ce-sffncontext`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionContext {
    /// Platform request id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Invoked function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Raw invocation type; see [`InvocationType`]
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Callback record id, required for async invocations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_invocation_id: Option<String>,
    /// Session-based permission sets to activate on the minted token
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub permission_sets: Vec<String>,
    /// Token minted for the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<MintedCredential>,
    /// Fields the proxy does not interpret, forwarded untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl FunctionContext {
    /// Parsed invocation type, if the raw value is recognized
    pub fn invocation_type(&self) -> Option<InvocationType> {
        self.kind.as_deref().and_then(InvocationType::from_wire)
    }

    /// Check required fields, returning the invocation type
    pub fn validate(&self, request_id: &str) -> Result<InvocationType> {
        if is_blank(self.function_name.as_deref()) {
            return Err(Error::bad_request(request_id, "Function name not provided"));
        }

        let invocation_type = self.invocation_type().ok_or_else(|| {
            Error::bad_request(
                request_id,
                format!(
                    "Invalid function invocation type '{}'",
                    self.kind.as_deref().unwrap_or_default()
                ),
            )
        })?;

        if invocation_type == InvocationType::Async
            && is_blank(self.function_invocation_id.as_deref())
        {
            return Err(Error::bad_request(
                request_id,
                "AsyncFunctionInvocationRequest__c ID not provided for async invocation",
            ));
        }

        Ok(invocation_type)
    }
}

/// `userContext` part of `ce-sfcontext`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    /// Org id
    #[serde(default)]
    pub org_id: Option<String>,
    /// Invoking user id
    #[serde(default)]
    pub user_id: Option<String>,
    /// Invoking username, the subject of the minted token
    #[serde(default)]
    pub username: Option<String>,
    /// Instance URL used for OAuth and REST calls
    #[serde(default)]
    pub salesforce_base_url: Option<String>,
    /// My Domain URL of the org
    #[serde(default)]
    pub org_domain_url: Option<String>,
    /// Namespace of the installed package, if any
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Org context carried in `ce-sfcontext`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgContext {
    /// REST API version, e.g. `57.0`
    #[serde(default)]
    pub api_version: Option<String>,
    /// Context payload version
    #[serde(default)]
    pub payload_version: Option<String>,
    /// Calling user
    #[serde(default)]
    pub user_context: Option<UserContext>,
}

impl OrgContext {
    /// Check required fields and narrow into a [`CallerOrg`]
    pub fn validate(self, request_id: &str) -> Result<CallerOrg> {
        let api_version = non_blank(self.api_version)
            .ok_or_else(|| Error::bad_request(request_id, "API Version not provided"))?;
        let user = self
            .user_context
            .ok_or_else(|| Error::bad_request(request_id, "UserContext not provided"))?;
        let org_id = non_blank(user.org_id)
            .ok_or_else(|| Error::bad_request(request_id, "Org ID not provided"))?;
        let username = non_blank(user.username)
            .ok_or_else(|| Error::bad_request(request_id, "Username not provided"))?;
        let org_api_base_url = non_blank(user.salesforce_base_url)
            .ok_or_else(|| Error::bad_request(request_id, "SalesforceBaseUrl not provided"))?;

        let org_api_base_url = org_api_base_url.trim_end_matches('/').to_string();
        let org_domain_url = non_blank(user.org_domain_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| org_api_base_url.clone());

        Ok(CallerOrg {
            api_version,
            org_id,
            username,
            org_domain_url,
            org_api_base_url,
            namespace: non_blank(user.namespace),
        })
    }
}

/// Validated org context of the caller
#[derive(Debug, Clone, PartialEq)]
pub struct CallerOrg {
    /// REST API version
    pub api_version: String,
    /// Org id claimed by the caller
    pub org_id: String,
    /// Invoking username
    pub username: String,
    /// My Domain URL; falls back to the API base URL
    pub org_domain_url: String,
    /// Instance URL for OAuth and REST calls
    pub org_api_base_url: String,
    /// Package namespace
    pub namespace: Option<String>,
}

impl CallerOrg {
    /// `<base>/services/data/v<version><path>`
    pub fn data_api_url(&self, base_url: &str, path: &str) -> String {
        format!("{}/services/data/v{}{}", base_url, self.api_version, path)
    }

    /// Prefix a custom object or field name with the package namespace
    pub fn qualify(&self, name: &str) -> String {
        qualify(self.namespace.as_deref(), name)
    }
}

/// Prefix a custom object or field name with `namespace__` when one is set
pub fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}__{}", ns, name),
        None => name.to_string(),
    }
}

/// State of one invocation as it moves through the pipeline
pub struct InvocationContext {
    /// Correlation id, set by header validation
    pub request_id: String,
    /// Inbound method, reused for the worker call
    pub method: Method,
    /// Outbound headers assembled by the pipeline
    pub headers: HeaderMap,
    /// Caller bearer token; used for platform calls only
    pub caller_token: Option<Zeroizing<String>>,
    /// Parsed `ce-sffncontext`
    pub function: Option<FunctionContext>,
    /// Validated `ce-sfcontext`
    pub org: Option<CallerOrg>,
}

impl InvocationContext {
    /// Start a context from the inbound request parts
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            request_id: String::new(),
            method,
            headers,
            caller_token: None,
            function: None,
            org: None,
        }
    }

    /// First value of a header as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed function context
    pub fn function(&self) -> Result<&FunctionContext> {
        self.function
            .as_ref()
            .ok_or_else(|| Error::Internal("function context not parsed".into()))
    }

    /// Mutable parsed function context
    pub fn function_mut(&mut self) -> Result<&mut FunctionContext> {
        self.function
            .as_mut()
            .ok_or_else(|| Error::Internal("function context not parsed".into()))
    }

    /// Validated org context
    pub fn org(&self) -> Result<&CallerOrg> {
        self.org
            .as_ref()
            .ok_or_else(|| Error::Internal("org context not parsed".into()))
    }

    /// Caller bearer token
    pub fn caller_token(&self) -> Result<&str> {
        self.caller_token
            .as_deref()
            .map(String::as_str)
            .ok_or_else(|| Error::Internal("caller token not extracted".into()))
    }

    /// Token minted for the worker, once credential minting has run
    pub fn minted_credential(&self) -> Option<&MintedCredential> {
        self.function.as_ref().and_then(|f| f.access_token.as_ref())
    }
}

/// Failure decoding a context header
#[derive(Debug, thiserror::Error)]
pub enum ContextDecodeError {
    /// Header is not valid base64
    #[error("expected base64 encoded header: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Decoded header is not the expected JSON
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a base64(JSON) context header
pub fn decode_header<T: DeserializeOwned>(
    encoded: &str,
) -> std::result::Result<T, ContextDecodeError> {
    let decoded = STANDARD.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Encode a context as base64(JSON) for a header
pub fn encode_header<T: Serialize>(value: &T) -> std::result::Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_context(kind: &str) -> FunctionContext {
        FunctionContext {
            id: Some("00Dxx-req".into()),
            function_name: Some("MyFunction".into()),
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    fn org_context() -> OrgContext {
        OrgContext {
            api_version: Some("57.0".into()),
            payload_version: Some("0.1".into()),
            user_context: Some(UserContext {
                org_id: Some("00Dxx0000006IYJ".into()),
                user_id: Some("005xx000001X8Uz".into()),
                username: Some("admin@example.com".into()),
                salesforce_base_url: Some("https://na1.salesforce.com/".into()),
                org_domain_url: None,
                namespace: None,
            }),
        }
    }

    #[test]
    fn test_invocation_type_wire_values() {
        assert_eq!(
            InvocationType::from_wire(INVOCATION_TYPE_SYNC),
            Some(InvocationType::Sync)
        );
        assert_eq!(
            InvocationType::from_wire(INVOCATION_TYPE_ASYNC),
            Some(InvocationType::Async)
        );
        assert_eq!(InvocationType::from_wire("sync"), None);
        assert_eq!(InvocationType::Async.as_wire(), INVOCATION_TYPE_ASYNC);
    }

    #[test]
    fn test_function_context_header_round_trip() {
        let mut ctx = function_context(INVOCATION_TYPE_ASYNC);
        ctx.function_invocation_id = Some("a1".into());
        ctx.permission_sets = vec!["ns__Custom".into(), "Other".into()];
        ctx.access_token = Some(MintedCredential::new("00Dxx!minted"));
        ctx.extra.insert(
            "requestTime".into(),
            serde_json::Value::String("2023-03-23T15:18:53.429-0700".into()),
        );

        let encoded = encode_header(&ctx).unwrap();
        let decoded: FunctionContext = decode_header(&encoded).unwrap();

        assert_eq!(decoded, ctx);
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let json = r#"{"functionName":"f","type":"com.salesforce.function.invoke.sync","resource":"https://x","source":"urn:event"}"#;
        let decoded: FunctionContext = decode_header(&STANDARD.encode(json)).unwrap();

        assert_eq!(decoded.extra["resource"], "https://x");
        let bytes = STANDARD.decode(encode_header(&decoded).unwrap()).unwrap();
        let reencoded: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reencoded["source"], "urn:event");
    }

    #[test]
    fn test_null_permission_sets_decode_as_empty() {
        let json = r#"{"functionName":"f","type":"com.salesforce.function.invoke.sync","permissionSets":null}"#;
        let decoded: FunctionContext = decode_header(&STANDARD.encode(json)).unwrap();
        assert!(decoded.permission_sets.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let result: std::result::Result<FunctionContext, _> = decode_header("not base64!!");
        assert!(matches!(result, Err(ContextDecodeError::Base64(_))));
    }

    #[test]
    fn test_validate_sync_context() {
        let ctx = function_context(INVOCATION_TYPE_SYNC);
        assert_eq!(ctx.validate("req").unwrap(), InvocationType::Sync);
    }

    #[test]
    fn test_validate_async_requires_invocation_id() {
        let ctx = function_context(INVOCATION_TYPE_ASYNC);
        let err = ctx.validate("req").unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("ID not provided"));
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let ctx = function_context("com.salesforce.function.invoke.batch");
        let err = ctx.validate("req").unwrap_err();
        assert!(err.to_string().contains("Invalid function invocation type"));
    }

    #[test]
    fn test_validate_requires_function_name() {
        let mut ctx = function_context(INVOCATION_TYPE_SYNC);
        ctx.function_name = None;
        assert!(ctx.validate("req").is_err());
    }

    #[test]
    fn test_org_context_narrows_into_caller_org() {
        let org = org_context().validate("req").unwrap();

        assert_eq!(org.api_version, "57.0");
        assert_eq!(org.org_api_base_url, "https://na1.salesforce.com");
        // Domain URL falls back to the API base URL
        assert_eq!(org.org_domain_url, "https://na1.salesforce.com");
        assert!(org.namespace.is_none());
    }

    #[test]
    fn test_org_context_missing_username() {
        let mut ctx = org_context();
        if let Some(user) = ctx.user_context.as_mut() {
            user.username = Some(String::new());
        }
        let err = ctx.validate("req").unwrap_err();
        assert_eq!(err.to_string(), "Username not provided");
    }

    #[test]
    fn test_org_context_missing_user_context() {
        let mut ctx = org_context();
        ctx.user_context = None;
        let err = ctx.validate("req").unwrap_err();
        assert_eq!(err.to_string(), "UserContext not provided");
    }

    #[test]
    fn test_caller_org_urls_and_namespace() {
        let mut org = org_context().validate("req").unwrap();
        assert_eq!(
            org.data_api_url(&org.org_api_base_url, "/sobjects/X/1"),
            "https://na1.salesforce.com/services/data/v57.0/sobjects/X/1"
        );
        assert_eq!(org.qualify("Status__c"), "Status__c");

        org.namespace = Some("acme".into());
        assert_eq!(org.qualify("Status__c"), "acme__Status__c");
    }

    #[test]
    fn test_minted_credential_debug_is_redacted() {
        let credential = MintedCredential::new("secret-token");
        assert!(!format!("{:?}", credential).contains("secret-token"));
        assert_eq!(credential.expose(), "secret-token");
    }
}
