//! Request/response dataplane: decodes REST v1, REST v2 and RPC calls into
//! protocol-neutral requests, routes them to a local model or an upstream
//! predictor, and encodes the answer back into the caller's wire format.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use prost::Message;

use oip_common::codec::{legacy, rest, rpc};
use oip_common::envelope::{
    self, Attributes, EnvelopeConfig, EnvelopeMode, JSON_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE,
};
use oip_common::{
    proto, InferError, InferRequest, InferResponse, InferResult, ModelMetadata, ServerMetadata,
};
use oip_registry::{Model, ModelKind, ModelRepository};

pub mod config;
pub mod grpc;
pub mod model;
pub mod predictor;

pub use config::{PredictorProtocol, ProtocolConfig};
pub use model::ForwardingModel;
use predictor::PredictorClient;

/// Extension advertised in server metadata.
pub const MODEL_REPOSITORY_EXTENSION: &str = "model_repository_extension";

/// REST dialect an inbound call arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestProtocol {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Infer,
    Explain,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Infer => "infer",
            Verb::Explain => "explain",
        }
    }
}

/// Envelope facts the response needs to mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub mode: EnvelopeMode,
    pub attributes: Attributes,
}

/// A decoded call, tagged with the wire form its answer must use.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundRequest {
    RestV1 {
        request: InferRequest,
        envelope: Option<InboundEnvelope>,
    },
    RestV2 {
        request: InferRequest,
        envelope: Option<InboundEnvelope>,
    },
    Rpc {
        request: InferRequest,
    },
}

impl InboundRequest {
    pub fn request(&self) -> &InferRequest {
        match self {
            InboundRequest::RestV1 { request, .. }
            | InboundRequest::RestV2 { request, .. }
            | InboundRequest::Rpc { request } => request,
        }
    }

    pub fn envelope(&self) -> Option<&InboundEnvelope> {
        match self {
            InboundRequest::RestV1 { envelope, .. } | InboundRequest::RestV2 { envelope, .. } => {
                envelope.as_ref()
            }
            InboundRequest::Rpc { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResponse {
    pub body: Bytes,
    pub headers: HeaderMap,
}

pub struct Dataplane {
    config: ProtocolConfig,
    envelope: EnvelopeConfig,
    registry: Arc<dyn ModelRepository>,
    predictor: Option<Arc<dyn PredictorClient>>,
}

impl std::fmt::Debug for Dataplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataplane")
            .field("config", &self.config)
            .field("envelope", &self.envelope)
            .field("models", &self.registry.list_models())
            .finish()
    }
}

fn parse_header_length(headers: &HeaderMap) -> InferResult<Option<usize>> {
    let Some(value) = headers.get(rest::INFERENCE_HEADER_CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .map(Some)
        .ok_or_else(|| {
            InferError::invalid(format!(
                "{} must be a non-negative integer",
                rest::INFERENCE_HEADER_CONTENT_LENGTH
            ))
        })
}

impl Dataplane {
    pub fn new(
        config: ProtocolConfig,
        envelope: EnvelopeConfig,
        registry: Arc<dyn ModelRepository>,
    ) -> anyhow::Result<Self> {
        let predictor = predictor::connect(&config)?;
        Ok(Self {
            config,
            envelope,
            registry,
            predictor,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn ModelRepository> {
        &self.registry
    }

    /// Unwrap the envelope (if any) and decode the body. The model name from
    /// the path wins over anything in the body.
    pub fn decode(
        &self,
        protocol: RestProtocol,
        model_name: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> InferResult<InboundRequest> {
        let decoded = envelope::decode(headers, body)?;
        let envelope = decoded.mode.map(|mode| InboundEnvelope {
            mode,
            attributes: decoded.attributes,
        });

        match protocol {
            RestProtocol::V1 => {
                let request = legacy::decode_request(model_name, &decoded.payload)?;
                Ok(InboundRequest::RestV1 { request, envelope })
            }
            RestProtocol::V2 => {
                // a structured envelope carries JSON only
                let header_len = match envelope.as_ref().map(|e| e.mode) {
                    Some(EnvelopeMode::Structured) => None,
                    _ => parse_header_length(headers)?,
                };
                let mut request = rest::decode_request(decoded.payload, header_len)?;
                request.model_name = model_name.to_string();
                Ok(InboundRequest::RestV2 { request, envelope })
            }
        }
    }

    fn route(&self, name: &str) -> InferResult<Arc<dyn Model>> {
        let model = self
            .registry
            .get_model(name)
            .ok_or_else(|| InferError::ModelNotFound(name.to_string()))?;
        if model.kind() == ModelKind::Chat {
            return Err(InferError::UnsupportedOperation(format!(
                "model of type {} does not support the tensor infer operation",
                model.kind()
            )));
        }
        if !model.ready() {
            return Err(InferError::ModelNotReady(name.to_string()));
        }
        Ok(model)
    }

    async fn invoke(&self, request: &InferRequest, verb: Verb) -> InferResult<InferResponse> {
        let model = self.route(&request.model_name)?;
        let start = Instant::now();

        let result = if model.uses_predictor() {
            let predictor = self.predictor.as_ref().ok_or_else(|| {
                InferError::UnsupportedOperation(format!(
                    "model {} forwards to a predictor but no predictor host is configured",
                    request.model_name
                ))
            })?;
            match verb {
                Verb::Infer => predictor.infer(request).await,
                Verb::Explain => predictor.explain(request).await,
            }
        } else {
            match verb {
                Verb::Infer => model.predict(request).await,
                Verb::Explain => model.explain(request).await,
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(response) => {
                tracing::debug!(
                    model = %request.model_name,
                    verb = verb.as_str(),
                    forwarded = model.uses_predictor(),
                    elapsed_ms,
                    "model call complete"
                );
                Ok(attach_hints(response, request))
            }
            Err(e) => {
                tracing::warn!(
                    model = %request.model_name,
                    verb = verb.as_str(),
                    error = %e,
                    elapsed_ms,
                    "model call failed"
                );
                Err(e)
            }
        }
    }

    pub async fn infer(&self, request: &InferRequest) -> InferResult<InferResponse> {
        self.invoke(request, Verb::Infer).await
    }

    pub async fn explain(&self, request: &InferRequest) -> InferResult<InferResponse> {
        self.invoke(request, Verb::Explain).await
    }

    /// Encode `response` in the wire form of `inbound`, re-wrapping it in an
    /// envelope when the request came in one.
    pub fn encode(
        &self,
        inbound: &InboundRequest,
        response: &InferResponse,
    ) -> InferResult<EncodedResponse> {
        let (body, header_len) = match inbound {
            InboundRequest::RestV1 { .. } => (legacy::encode_response(response)?, None),
            InboundRequest::RestV2 { .. } => rest::encode_response(response)?,
            InboundRequest::Rpc { .. } => {
                let body = rpc::to_rpc_response(response)?.encode_to_vec();
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-protobuf"));
                return Ok(EncodedResponse {
                    body: Bytes::from(body),
                    headers,
                });
            }
        };

        let content_type = if header_len.is_some() {
            OCTET_STREAM_CONTENT_TYPE
        } else {
            JSON_CONTENT_TYPE
        };

        let (mut headers, body) = match inbound.envelope() {
            Some(env) => envelope::encode(
                &self.envelope,
                &inbound.request().model_name,
                env.mode,
                &env.attributes,
                Bytes::from(body),
                content_type,
            )?,
            None => {
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                (headers, Bytes::from(body))
            }
        };
        if let Some(len) = header_len {
            headers.insert(rest::INFERENCE_HEADER_CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(EncodedResponse { body, headers })
    }

    /// Decode, invoke and encode one REST call.
    pub async fn handle_rest(
        &self,
        protocol: RestProtocol,
        verb: Verb,
        model_name: &str,
        body: Bytes,
        headers: &HeaderMap,
    ) -> InferResult<EncodedResponse> {
        let inbound = self.decode(protocol, model_name, body, headers)?;
        let response = match verb {
            Verb::Infer => self.infer(inbound.request()).await?,
            Verb::Explain => self.explain(inbound.request()).await?,
        };
        self.encode(&inbound, &response)
    }

    /// RPC `ModelInfer`.
    pub async fn model_infer(
        &self,
        request: proto::ModelInferRequest,
    ) -> InferResult<proto::ModelInferResponse> {
        let inbound = InboundRequest::Rpc {
            request: InferRequest::try_from(request)?,
        };
        let response = self.infer(inbound.request()).await?;
        rpc::to_rpc_response(&response)
    }

    /// Liveness of this server. With a predictor configured the upstream must
    /// also be live.
    pub async fn live(&self) -> bool {
        match &self.predictor {
            Some(p) => p.server_live().await,
            None => true,
        }
    }

    pub async fn ready(&self) -> bool {
        match &self.predictor {
            Some(p) => p.server_ready().await,
            None => true,
        }
    }

    /// Readiness of one model: the local flag, and for forwarding models the
    /// upstream's answer as well.
    pub async fn model_ready(&self, name: &str) -> InferResult<bool> {
        let model = self
            .registry
            .get_model(name)
            .ok_or_else(|| InferError::ModelNotFound(name.to_string()))?;
        if !model.ready() {
            return Ok(false);
        }
        match (&self.predictor, model.uses_predictor()) {
            (Some(p), true) => Ok(p.model_ready(name).await),
            _ => Ok(true),
        }
    }

    pub fn metadata(&self) -> ServerMetadata {
        ServerMetadata {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extensions: vec![MODEL_REPOSITORY_EXTENSION.to_string()],
        }
    }

    pub fn model_metadata(&self, name: &str) -> InferResult<ModelMetadata> {
        let model = self
            .registry
            .get_model(name)
            .ok_or_else(|| InferError::ModelNotFound(name.to_string()))?;
        let mut metadata = model.metadata();
        metadata.name = name.to_string();
        Ok(metadata)
    }

    pub fn list_models(&self) -> Vec<String> {
        self.registry.list_models()
    }

    /// Make `name` servable. A name that is already registered is left as
    /// is; an unknown one is registered for forwarding when a predictor is
    /// configured.
    pub fn load_model(&self, name: &str) -> InferResult<()> {
        if self.registry.get_model(name).is_some() {
            return Ok(());
        }
        if self.predictor.is_none() {
            return Err(InferError::ModelNotFound(name.to_string()));
        }
        self.registry.update(Arc::new(ForwardingModel::new(name)));
        tracing::info!(model = %name, "registered forwarding model");
        Ok(())
    }

    pub fn unload_model(&self, name: &str) -> InferResult<()> {
        if !self.registry.remove(name) {
            return Err(InferError::ModelNotFound(name.to_string()));
        }
        tracing::info!(model = %name, "unloaded model");
        Ok(())
    }
}

/// Fill in what the model left blank and carry the request's output
/// preferences over to the encoder.
fn attach_hints(mut response: InferResponse, request: &InferRequest) -> InferResponse {
    if response.model_name.is_empty() {
        response.model_name = request.model_name.clone();
    }
    if response.id.is_empty() {
        response.id = request
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    }
    response.request_outputs = request.request_outputs.clone();
    response.use_binary_outputs = request.binary_data_output();
    response
}
