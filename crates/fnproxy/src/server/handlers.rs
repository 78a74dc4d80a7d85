//! Route handlers

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::info;

use super::AppState;
use crate::context::{InvocationContext, HEADER_REQUEST_ID};
use crate::dispatcher::MAX_BODY_SIZE;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

async fn read_body(body: Body, request_id: Option<&str>) -> Result<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| Error::InvalidRequest {
            request_id: request_id.map(String::from),
            message: format!("Failed to read request body: {}", e),
            status: StatusCode::BAD_REQUEST,
        })
}

async fn prepare(pipeline: &Pipeline, request: Request) -> Result<(InvocationContext, Bytes)> {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    info!(
        request_id = ?request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "received invocation"
    );

    let body = read_body(body, request_id.as_deref()).await?;
    let mut ctx = InvocationContext::new(parts.method, parts.headers);
    pipeline.run(&mut ctx).await?;
    Ok((ctx, body))
}

/// `/sync/**`: run the pipeline and return the worker's response
pub async fn sync_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (ctx, body) = prepare(&state.sync_pipeline, request).await?;
    state.dispatcher.dispatch_sync(&ctx, body).await
}

/// `/async/**`: run the pipeline, answer 201 and invoke in the background
pub async fn async_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (ctx, body) = prepare(&state.async_pipeline, request).await?;

    // The task owns the context; the caller is not told how it ends
    drop(state.dispatcher.dispatch_async(ctx, body));
    Ok(StatusCode::CREATED.into_response())
}

/// `/healthcheck/**`: check the worker, restarting it once on failure
pub async fn healthcheck_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body = read_body(body, None).await?;
    state.health.check(&parts.headers, body).await
}

/// Every other route
pub async fn not_supported_handler() -> StatusCode {
    StatusCode::FORBIDDEN
}
