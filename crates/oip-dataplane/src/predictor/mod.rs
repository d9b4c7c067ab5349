//! Clients for the upstream predictor a proxying model forwards to.
//!
//! Forwarding calls are bounded by the configured timeout and surface
//! failures through the error taxonomy. Probes never fail: any transport
//! error, non-2xx status or unexpected body reads as "not live" / "not ready".

mod grpc;
mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use oip_common::{InferError, InferRequest, InferResponse, InferResult};

use crate::config::{PredictorProtocol, ProtocolConfig};

pub use grpc::GrpcPredictor;
pub use rest::RestPredictor;

/// Upper bound for a single probe, capped by the forwarding timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PredictorClient: Send + Sync {
    async fn infer(&self, request: &InferRequest) -> InferResult<InferResponse>;

    async fn explain(&self, request: &InferRequest) -> InferResult<InferResponse>;

    async fn server_live(&self) -> bool;

    async fn server_ready(&self) -> bool;

    async fn model_ready(&self, name: &str) -> bool;
}

/// Client for the configured predictor, or `None` when no host is set.
pub fn connect(config: &ProtocolConfig) -> anyhow::Result<Option<Arc<dyn PredictorClient>>> {
    if config.predictor_host.is_none() {
        return Ok(None);
    }
    let client: Arc<dyn PredictorClient> = match config.predictor_protocol {
        PredictorProtocol::RestV1 | PredictorProtocol::RestV2 => {
            Arc::new(RestPredictor::new(config)?)
        }
        PredictorProtocol::GrpcV2 => Arc::new(GrpcPredictor::new(config)?),
    };
    tracing::info!(
        host = config.predictor_host.as_deref().unwrap_or_default(),
        protocol = %config.predictor_protocol,
        use_ssl = config.predictor_use_ssl,
        "upstream predictor configured"
    );
    Ok(Some(client))
}

pub(crate) fn probe_timeout(forward_timeout: Duration) -> Duration {
    PROBE_TIMEOUT.min(forward_timeout)
}

/// Run a forwarding call under `limit`; running out of time means the
/// predictor is not ready.
pub(crate) async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = InferResult<T>>,
) -> InferResult<T> {
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(InferError::ModelNotReady(format!(
            "upstream predictor did not answer within {}s",
            limit.as_secs_f64()
        )))
    })
}
