use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;

use oip_common::InferError;
use oip_dataplane::{RestProtocol, Verb};

use crate::state::AppState;

/// Split a v1 path segment such as `flowers:predict` into model and verb.
fn split_v1_action(segment: &str) -> Option<(&str, Verb)> {
    let (model, action) = segment.rsplit_once(':')?;
    if model.is_empty() {
        return None;
    }
    match action {
        "predict" => Some((model, Verb::Infer)),
        "explain" => Some((model, Verb::Explain)),
        _ => None,
    }
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn read_body(st: &AppState, req: Request<Body>) -> Result<Bytes, Response> {
    axum::body::to_bytes(req.into_body(), st.max_request_body_bytes)
        .await
        .map_err(|_| {
            st.metrics
                .request_too_large_total
                .fetch_add(1, Ordering::Relaxed);
            (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        })
}

async fn run_rest(
    st: AppState,
    protocol: RestProtocol,
    verb: Verb,
    model_name: &str,
    headers: HeaderMap,
    req: Request<Body>,
) -> Response {
    st.metrics.record_verb(verb);
    let body = match read_body(&st, req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match st
        .dataplane
        .handle_rest(protocol, verb, model_name, body, &headers)
        .await
    {
        Ok(encoded) => (StatusCode::OK, encoded.headers, encoded.body).into_response(),
        Err(e) => {
            if matches!(e, InferError::InvalidInput(_)) {
                tracing::debug!(model = %model_name, error = %e, "rejected request");
            }
            e.into_response()
        }
    }
}

pub async fn server_live_v1(State(st): State<AppState>) -> impl IntoResponse {
    let live = st.dataplane.live().await;
    let status = if live { "alive" } else { "unavailable" };
    (probe_status(live), Json(json!({ "status": status })))
}

pub async fn list_models_v1(State(st): State<AppState>) -> impl IntoResponse {
    Json(json!({ "models": st.dataplane.list_models() }))
}

pub async fn model_ready_v1(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Response, InferError> {
    let ready = st.dataplane.model_ready(&model_name).await?;
    let flag = if ready { "True" } else { "False" };
    Ok((
        probe_status(ready),
        Json(json!({ "name": model_name, "ready": flag })),
    )
        .into_response())
}

pub async fn model_action_v1(
    State(st): State<AppState>,
    Path(segment): Path<String>,
    headers: HeaderMap,
    req: Request<Body>,
) -> Response {
    let Some((model_name, verb)) = split_v1_action(&segment) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown action in {segment}") })),
        )
            .into_response();
    };
    run_rest(st, RestProtocol::V1, verb, model_name, headers, req).await
}

pub async fn server_metadata_v2(State(st): State<AppState>) -> impl IntoResponse {
    Json(st.dataplane.metadata())
}

pub async fn server_live_v2(State(st): State<AppState>) -> impl IntoResponse {
    let live = st.dataplane.live().await;
    (probe_status(live), Json(json!({ "live": live })))
}

pub async fn server_ready_v2(State(st): State<AppState>) -> impl IntoResponse {
    let ready = st.dataplane.ready().await;
    (probe_status(ready), Json(json!({ "ready": ready })))
}

pub async fn model_metadata_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Response, InferError> {
    let metadata = st.dataplane.model_metadata(&model_name)?;
    Ok(Json(metadata).into_response())
}

pub async fn model_ready_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Response, InferError> {
    let ready = st.dataplane.model_ready(&model_name).await?;
    Ok((
        probe_status(ready),
        Json(json!({ "name": model_name, "ready": ready })),
    )
        .into_response())
}

pub async fn load_model_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Response, InferError> {
    st.dataplane.load_model(&model_name)?;
    Ok(Json(json!({ "name": model_name, "load": true })).into_response())
}

pub async fn unload_model_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
) -> Result<Response, InferError> {
    st.dataplane.unload_model(&model_name)?;
    Ok(Json(json!({ "name": model_name, "unload": true })).into_response())
}

pub async fn infer_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
    headers: HeaderMap,
    req: Request<Body>,
) -> Response {
    run_rest(st, RestProtocol::V2, Verb::Infer, &model_name, headers, req).await
}

pub async fn explain_v2(
    State(st): State<AppState>,
    Path(model_name): Path<String>,
    headers: HeaderMap,
    req: Request<Body>,
) -> Response {
    run_rest(st, RestProtocol::V2, Verb::Explain, &model_name, headers, req).await
}
