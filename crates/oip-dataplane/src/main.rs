mod args;
mod handlers;
mod metrics;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;

use oip_common::EnvelopeConfig;
use oip_dataplane::grpc::GrpcService;
use oip_dataplane::{Dataplane, ForwardingModel, ProtocolConfig};
use oip_registry::{InMemoryRepository, ModelRepository};

use crate::args::Args;
use crate::handlers::*;
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error=%e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel_provider = oip_common::telemetry::init_tracing(
        "oip-dataplane",
        args.log_format,
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let config = ProtocolConfig {
        predictor_host: args.predictor_host.clone().filter(|h| !h.is_empty()),
        predictor_protocol: args.predictor_protocol,
        predictor_use_ssl: args.predictor_use_ssl,
        predictor_timeout: Duration::from_secs(args.predictor_timeout_secs),
    };
    let envelope = EnvelopeConfig {
        source: args.ce_source.clone().filter(|s| !s.is_empty()),
        event_type: args.ce_type.clone().filter(|s| !s.is_empty()),
        merge: args.ce_merge,
    };

    let registry = InMemoryRepository::new();
    for name in args.model_names.iter().filter(|n| !n.is_empty()) {
        registry.update(Arc::new(ForwardingModel::new(name.as_str())));
    }

    let dataplane = Arc::new(Dataplane::new(config, envelope, Arc::new(registry))?);
    tracing::info!(
        predictor_host = ?dataplane.config().predictor_host,
        predictor_protocol = %dataplane.config().predictor_protocol,
        models = ?dataplane.list_models(),
        "dataplane configured"
    );

    let st = AppState {
        dataplane: dataplane.clone(),
        metrics: Arc::new(metrics::Metrics::default()),
        max_request_body_bytes: args.max_request_body_bytes,
    };

    let app = Router::new()
        .route("/", get(server_live_v1))
        .route("/v1/models", get(list_models_v1))
        .route(
            "/v1/models/:model",
            get(model_ready_v1).post(model_action_v1),
        )
        .route("/v2", get(server_metadata_v2))
        .route("/v2/health/live", get(server_live_v2))
        .route("/v2/health/ready", get(server_ready_v2))
        .route("/v2/models/:model", get(model_metadata_v2))
        .route("/v2/models/:model/ready", get(model_ready_v2))
        .route("/v2/models/:model/infer", post(infer_v2))
        .route("/v2/models/:model/explain", post(explain_v2))
        .route("/v2/repository/models/:model/load", post(load_model_v2))
        .route("/v2/repository/models/:model/unload", post(unload_model_v2))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st);

    let grpc_addr: SocketAddr = args.grpc_addr.parse()?;
    let grpc = tonic::transport::Server::builder()
        .add_service(GrpcService::new(dataplane).into_server())
        .serve_with_shutdown(grpc_addr, shutdown_signal());

    let listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    tracing::info!(http_addr = %args.http_addr, grpc_addr = %grpc_addr, "listening");
    let http = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    let result = tokio::try_join!(
        async { http.await.map_err(anyhow::Error::from) },
        async { grpc.await.map_err(anyhow::Error::from) },
    );

    if let Some(provider) = otel_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error=%e, "failed to flush traces");
        }
    }
    result.map(|_| ())
}
