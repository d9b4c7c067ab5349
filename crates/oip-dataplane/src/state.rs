use std::sync::Arc;

use oip_dataplane::Dataplane;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub dataplane: Arc<Dataplane>,
    pub metrics: Arc<Metrics>,
    pub max_request_body_bytes: usize,
}
