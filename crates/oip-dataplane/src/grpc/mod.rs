//! `inference.GRPCInferenceService` served over tonic.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use oip_common::proto::{
    model_metadata_response::TensorMetadata, ModelInferRequest, ModelInferResponse,
    ModelMetadataRequest, ModelMetadataResponse, ModelReadyRequest, ModelReadyResponse,
    ServerLiveRequest, ServerLiveResponse, ServerMetadataRequest, ServerMetadataResponse,
    ServerReadyRequest, ServerReadyResponse,
};

use crate::Dataplane;

pub use oip_common::proto::grpc_inference_service_server::{
    GrpcInferenceService, GrpcInferenceServiceServer,
};

#[derive(Debug, Clone)]
pub struct GrpcService {
    dataplane: Arc<Dataplane>,
}

impl GrpcService {
    pub fn new(dataplane: Arc<Dataplane>) -> Self {
        Self { dataplane }
    }

    pub fn into_server(self) -> GrpcInferenceServiceServer<Self> {
        GrpcInferenceServiceServer::new(self)
    }
}

fn tensor_metadata(t: oip_common::TensorMetadata) -> TensorMetadata {
    TensorMetadata {
        name: t.name,
        datatype: t.datatype,
        shape: t.shape,
    }
}

#[tonic::async_trait]
impl GrpcInferenceService for GrpcService {
    async fn server_live(
        &self,
        _request: Request<ServerLiveRequest>,
    ) -> Result<Response<ServerLiveResponse>, Status> {
        Ok(Response::new(ServerLiveResponse {
            live: self.dataplane.live().await,
        }))
    }

    async fn server_ready(
        &self,
        _request: Request<ServerReadyRequest>,
    ) -> Result<Response<ServerReadyResponse>, Status> {
        Ok(Response::new(ServerReadyResponse {
            ready: self.dataplane.ready().await,
        }))
    }

    async fn model_ready(
        &self,
        request: Request<ModelReadyRequest>,
    ) -> Result<Response<ModelReadyResponse>, Status> {
        let name = request.into_inner().name;
        let ready = self.dataplane.model_ready(&name).await?;
        Ok(Response::new(ModelReadyResponse { ready }))
    }

    async fn server_metadata(
        &self,
        _request: Request<ServerMetadataRequest>,
    ) -> Result<Response<ServerMetadataResponse>, Status> {
        let meta = self.dataplane.metadata();
        Ok(Response::new(ServerMetadataResponse {
            name: meta.name,
            version: meta.version,
            extensions: meta.extensions,
        }))
    }

    async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        let name = request.into_inner().name;
        let meta = self.dataplane.model_metadata(&name)?;
        Ok(Response::new(ModelMetadataResponse {
            name: meta.name,
            versions: meta.versions,
            platform: meta.platform,
            inputs: meta.inputs.into_iter().map(tensor_metadata).collect(),
            outputs: meta.outputs.into_iter().map(tensor_metadata).collect(),
        }))
    }

    async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        let reply = self.dataplane.model_infer(request.into_inner()).await?;
        Ok(Response::new(reply))
    }
}
