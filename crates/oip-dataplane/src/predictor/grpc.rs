use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use oip_common::codec::rpc::to_rpc_request;
use oip_common::proto::{self, grpc_inference_service_client::GrpcInferenceServiceClient};
use oip_common::{InferError, InferRequest, InferResponse, InferResult};

use super::{bounded, probe_timeout, PredictorClient};
use crate::config::ProtocolConfig;

/// Forwards to an upstream predictor over `inference.GRPCInferenceService`.
/// A channel is opened per call; TLS is used iff the predictor is configured
/// for SSL.
#[derive(Debug, Clone)]
pub struct GrpcPredictor {
    uri: String,
    use_ssl: bool,
    timeout: Duration,
}

impl GrpcPredictor {
    pub fn new(config: &ProtocolConfig) -> anyhow::Result<Self> {
        let uri = config
            .grpc_uri()
            .ok_or_else(|| anyhow::anyhow!("predictor host is not configured"))?;
        // reject unusable hosts at startup rather than on first call
        Endpoint::from_shared(uri.clone())?;
        Ok(Self {
            uri,
            use_ssl: config.predictor_use_ssl,
            timeout: config.predictor_timeout,
        })
    }

    async fn channel(&self, timeout: Duration) -> InferResult<Channel> {
        let endpoint = Endpoint::from_shared(self.uri.clone())
            .map_err(|e| InferError::ModelNotReady(format!("invalid predictor address: {e}")))?
            .connect_timeout(timeout.min(Duration::from_secs(3)))
            .timeout(timeout);
        let endpoint = if self.use_ssl {
            endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| InferError::ModelNotReady(format!("tls setup failed: {e}")))?
        } else {
            endpoint
        };
        endpoint.connect().await.map_err(|e| {
            InferError::ModelNotReady(format!("upstream predictor unreachable: {e}"))
        })
    }

    async fn client(&self, timeout: Duration) -> InferResult<GrpcInferenceServiceClient<Channel>> {
        Ok(GrpcInferenceServiceClient::new(self.channel(timeout).await?))
    }

    async fn probe<T, F, Fut>(&self, method: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(GrpcInferenceServiceClient<Channel>) -> Fut,
        Fut: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
    {
        let limit = probe_timeout(self.timeout);
        let fut = async {
            let client = self.client(limit).await?;
            Ok::<_, InferError>(call(client).await?.into_inner())
        };
        match bounded(limit, fut).await {
            Ok(resp) => Some(resp),
            Err(e) => {
                tracing::debug!(uri = %self.uri, method, error = %e, "rpc health check failed");
                None
            }
        }
    }
}

#[async_trait]
impl PredictorClient for GrpcPredictor {
    async fn infer(&self, request: &InferRequest) -> InferResult<InferResponse> {
        let message = to_rpc_request(request)?;
        let fut = async {
            let mut client = self.client(self.timeout).await?;
            let resp = client.model_infer(message).await?.into_inner();
            InferResponse::try_from(resp).map_err(|e| InferError::Upstream {
                status: 502,
                message: format!("malformed upstream response: {e}"),
            })
        };
        bounded(self.timeout, fut).await
    }

    async fn explain(&self, _request: &InferRequest) -> InferResult<InferResponse> {
        Err(InferError::UnsupportedOperation(
            "explain is not available over the rpc predictor protocol".to_string(),
        ))
    }

    async fn server_live(&self) -> bool {
        self.probe("ServerLive", |mut c| async move {
            c.server_live(proto::ServerLiveRequest {}).await
        })
        .await
        .is_some_and(|r| r.live)
    }

    async fn server_ready(&self) -> bool {
        self.probe("ServerReady", |mut c| async move {
            c.server_ready(proto::ServerReadyRequest {}).await
        })
        .await
        .is_some_and(|r| r.ready)
    }

    async fn model_ready(&self, name: &str) -> bool {
        let request = proto::ModelReadyRequest {
            name: name.to_string(),
            version: String::new(),
        };
        self.probe("ModelReady", |mut c| async move { c.model_ready(request).await })
            .await
            .is_some_and(|r| r.ready)
    }
}
