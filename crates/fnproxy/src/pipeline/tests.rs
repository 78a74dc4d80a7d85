//! Pipeline ordering tests

use std::sync::Mutex;

use axum::http::{HeaderMap, Method, StatusCode};
use jsonwebtoken::{Algorithm, EncodingKey};

use super::*;
use crate::platform::MockPlatformClient;

type Log = Arc<Mutex<Vec<&'static str>>>;

struct RecordingStep {
    name: &'static str,
    priority: u16,
    fail_with: Option<StatusCode>,
    log: Log,
}

#[async_trait]
impl RequestStep for RecordingStep {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        self.log.lock().unwrap().push(self.name);
        match self.fail_with {
            Some(status) => Err(Error::invalid(&ctx.request_id, "rejected", status)),
            None => Ok(()),
        }
    }
}

fn step(
    name: &'static str,
    priority: u16,
    fail_with: Option<StatusCode>,
    log: &Log,
) -> Arc<dyn RequestStep> {
    Arc::new(RecordingStep {
        name,
        priority,
        fail_with,
        log: log.clone(),
    })
}

fn ctx() -> InvocationContext {
    let mut ctx = InvocationContext::new(Method::POST, HeaderMap::new());
    ctx.request_id = "req-1".into();
    ctx
}

#[tokio::test]
async fn test_steps_run_in_priority_order() {
    let log = Log::default();
    let pipeline = Pipeline::new(vec![
        step("third", 30, None, &log),
        step("first", 10, None, &log),
        step("second", 20, None, &log),
    ])
    .unwrap();

    pipeline.run(&mut ctx()).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_failure_stops_later_steps() {
    let log = Log::default();
    let pipeline = Pipeline::new(vec![
        step("validate", 10, None, &log),
        step("reject", 20, Some(StatusCode::GONE), &log),
        step("spy", 30, None, &log),
    ])
    .unwrap();

    let err = pipeline.run(&mut ctx()).await.unwrap_err();

    assert_eq!(err.status(), StatusCode::GONE);
    assert_eq!(err.request_id(), Some("req-1"));
    assert_eq!(*log.lock().unwrap(), vec!["validate", "reject"]);
}

#[test]
fn test_duplicate_priority_is_config_error() {
    let log = Log::default();
    let steps = vec![step("a", 10, None, &log), step("b", 10, None, &log)];
    let err = Pipeline::new(steps).unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("priority 10"));
}

fn minter(platform: Arc<dyn PlatformClient>) -> Arc<CredentialMinter> {
    Arc::new(CredentialMinter::with_key(
        "consumer",
        EncodingKey::from_secret(b"secret"),
        Algorithm::HS256,
        None,
        platform,
    ))
}

#[test]
fn test_standard_pipeline_order() {
    let platform: Arc<dyn PlatformClient> = Arc::new(MockPlatformClient::new());
    let minter = minter(platform.clone());

    let pipeline = Pipeline::standard("00Dxx0000006IYJEA2", platform, minter).unwrap();

    assert_eq!(
        pipeline.step_names(),
        vec![
            "validate-headers",
            "validate-contexts",
            "validate-caller",
            "mint-credential",
            "activate-permission-sets",
            "prepare-worker-request",
        ]
    );
}

#[test]
fn test_async_pipeline_checks_type_before_platform_steps() {
    let platform: Arc<dyn PlatformClient> = Arc::new(MockPlatformClient::new());
    let minter = minter(platform.clone());

    let pipeline = Pipeline::standard_async("00Dxx0000006IYJEA2", platform, minter).unwrap();

    assert_eq!(
        pipeline.step_names(),
        vec![
            "validate-headers",
            "validate-contexts",
            "require-invocation-type",
            "validate-caller",
            "mint-credential",
            "activate-permission-sets",
            "prepare-worker-request",
        ]
    );
}

#[test]
fn test_with_step_rejects_taken_priority() {
    let log = Log::default();
    let pipeline = Pipeline::new(vec![step("a", 10, None, &log)]).unwrap();

    let err = pipeline.with_step(step("b", 10, None, &log)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
