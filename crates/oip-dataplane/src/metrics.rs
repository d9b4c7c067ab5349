use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use oip_dataplane::Verb;

use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub infer_total: AtomicU64,
    pub explain_total: AtomicU64,
    pub request_too_large_total: AtomicU64,
}

impl Metrics {
    pub fn record_verb(&self, verb: Verb) {
        match verb {
            Verb::Infer => self.infer_total.fetch_add(1, Ordering::Relaxed),
            Verb::Explain => self.explain_total.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let m = &st.metrics;
    let body = format!(
        "oip_dataplane_requests_total {}\noip_dataplane_requests_inflight {}\noip_dataplane_responses_2xx {}\noip_dataplane_responses_4xx {}\noip_dataplane_responses_5xx {}\noip_dataplane_infer_total {}\noip_dataplane_explain_total {}\noip_dataplane_request_too_large_total {}\n",
        m.requests_total.load(Ordering::Relaxed),
        m.requests_inflight.load(Ordering::Relaxed),
        m.status_2xx.load(Ordering::Relaxed),
        m.status_4xx.load(Ordering::Relaxed),
        m.status_5xx.load(Ordering::Relaxed),
        m.infer_total.load(Ordering::Relaxed),
        m.explain_total.load(Ordering::Relaxed),
        m.request_too_large_total.load(Ordering::Relaxed),
    );
    (axum::http::StatusCode::OK, body)
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    st.metrics.requests_inflight.fetch_add(1, Ordering::Relaxed);
    let resp = next.run(req).await;
    st.metrics.requests_inflight.fetch_sub(1, Ordering::Relaxed);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}
