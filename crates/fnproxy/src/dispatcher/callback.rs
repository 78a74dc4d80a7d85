//! Async invocation callback record

use serde_json::{Map, Value};
use tracing::{error, info};

use super::{WorkerError, WorkerResponse};
use crate::context::{qualify, InvocationContext, HEADER_EXTRA_INFO};
use crate::platform::{PlatformClient, PlatformError};

/// Custom object holding async invocation results
pub const CALLBACK_OBJECT: &str = "AsyncFunctionInvocationRequest__c";

/// Whether the worker call succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Worker answered 2xx
    Success,
    /// Worker answered anything else or could not be reached
    Error,
}

impl OutcomeStatus {
    /// Value stored in `Status__c`
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Error => "ERROR",
        }
    }
}

/// Result of an async invocation, written once to its callback record
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncInvocationOutcome {
    /// Package namespace of the callback object and its fields
    pub namespace: Option<String>,
    /// Worker's `x-extra-info` header
    pub extra_info: String,
    /// Worker body, or the failure text
    pub response_body: String,
    /// Success flag
    pub status: OutcomeStatus,
    /// Worker status, 503 when unreachable
    pub status_code: u16,
}

impl AsyncInvocationOutcome {
    /// Outcome of a worker answer of any status
    pub fn from_response(namespace: Option<String>, response: &WorkerResponse) -> Self {
        let status = if response.status.is_success() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Error
        };
        Self {
            namespace,
            extra_info: response
                .headers
                .get(HEADER_EXTRA_INFO)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            response_body: String::from_utf8_lossy(&response.body).into_owned(),
            status,
            status_code: response.status.as_u16(),
        }
    }

    /// Outcome of a worker that could not be reached
    pub fn from_error(namespace: Option<String>, err: &WorkerError) -> Self {
        Self {
            namespace,
            extra_info: String::new(),
            response_body: err.to_string(),
            status: OutcomeStatus::Error,
            status_code: 503,
        }
    }

    /// Callback object name in this outcome's namespace
    pub fn object(&self) -> String {
        qualify(self.namespace.as_deref(), CALLBACK_OBJECT)
    }

    /// Record fields, namespace-qualified
    pub fn record_fields(&self) -> Value {
        let ns = self.namespace.as_deref();
        let mut fields = Map::new();
        fields.insert(qualify(ns, "ExtraInfo__c"), self.extra_info.clone().into());
        fields.insert(
            qualify(ns, "Response__c"),
            self.response_body.clone().into(),
        );
        fields.insert(qualify(ns, "Status__c"), self.status.as_str().into());
        fields.insert(qualify(ns, "StatusCode__c"), self.status_code.into());
        Value::Object(fields)
    }
}

/// Write the outcome to the invocation's callback record
///
/// Failures are logged; the record is written at most once.
pub(super) async fn write_outcome(
    platform: &dyn PlatformClient,
    ctx: &InvocationContext,
    outcome: &AsyncInvocationOutcome,
) {
    let request_id = ctx.request_id.as_str();
    let object = outcome.object();

    let (Some(org), Some(function)) = (ctx.org.as_ref(), ctx.function.as_ref()) else {
        error!(
            request_id = %request_id,
            object = %object,
            "unable to save function response: invocation context incomplete"
        );
        return;
    };
    let invocation_id = function
        .function_invocation_id
        .as_deref()
        .unwrap_or_default();

    let Some(token) = function.access_token.as_ref() else {
        error!(
            request_id = %request_id,
            object = %object,
            invocation_id = %invocation_id,
            "unable to save function response: function token not provided"
        );
        return;
    };

    let url = org.data_api_url(
        &org.org_domain_url,
        &format!("/sobjects/{}/{}", object, invocation_id),
    );

    match platform
        .update_record(&url, token.expose(), &outcome.record_fields())
        .await
    {
        Ok(()) => info!(
            request_id = %request_id,
            object = %object,
            invocation_id = %invocation_id,
            status = outcome.status.as_str(),
            "saved function response"
        ),
        Err(e) => {
            let mut reason = e.to_string();
            if matches!(e, PlatformError::Status { .. })
                && reason.contains("The requested resource does not exist")
            {
                reason.push_str(&format!(
                    ". Ensure that user {} has access to {}.",
                    org.username, object
                ));
            }
            error!(
                request_id = %request_id,
                object = %object,
                invocation_id = %invocation_id,
                error = %reason,
                "unable to save function response"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode};

    const EXTRA_INFO: &str = "%7B%22requestId%22%3A%22r%22%7D";

    fn response(status: StatusCode, body: &'static str) -> WorkerResponse {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EXTRA_INFO, EXTRA_INFO.parse().unwrap());
        WorkerResponse {
            status,
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_success_outcome() {
        let outcome = AsyncInvocationOutcome::from_response(None, &response(StatusCode::OK, "ok"));

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.response_body, "ok");
        assert_eq!(outcome.extra_info, EXTRA_INFO);
    }

    #[test]
    fn test_worker_error_status_is_error_outcome() {
        let worker = response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        let outcome = AsyncInvocationOutcome::from_response(None, &worker);

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.status_code, 500);
    }

    #[test]
    fn test_unreachable_worker_outcome() {
        let err = WorkerError::Unreachable("connection refused".into());
        let outcome = AsyncInvocationOutcome::from_error(None, &err);

        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.status_code, 503);
        assert!(outcome.response_body.contains("connection refused"));
    }

    #[test]
    fn test_record_fields_are_namespaced() {
        let worker = response(StatusCode::OK, "ok");

        let plain = AsyncInvocationOutcome::from_response(None, &worker);
        assert_eq!(plain.object(), "AsyncFunctionInvocationRequest__c");
        let fields = plain.record_fields();
        assert_eq!(fields["Status__c"], "SUCCESS");
        assert_eq!(fields["StatusCode__c"], 200);

        let namespaced = AsyncInvocationOutcome::from_response(Some("acme".into()), &worker);
        assert_eq!(
            namespaced.object(),
            "acme__AsyncFunctionInvocationRequest__c"
        );
        let fields = namespaced.record_fields();
        assert_eq!(fields["acme__Status__c"], "SUCCESS");
        assert_eq!(fields["acme__Response__c"], "ok");
        assert!(fields.get("Status__c").is_none());
    }
}
