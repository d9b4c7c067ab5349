use clap::Parser;

use oip_common::telemetry::LogFormat;
use oip_dataplane::PredictorProtocol;

#[derive(Debug, Parser)]
#[command(name = "oip-dataplane", version, about = "Open Inference Protocol dataplane")]
pub struct Args {
    #[arg(long, env = "OIP_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    #[arg(long, env = "OIP_GRPC_ADDR", default_value = "0.0.0.0:8081")]
    pub grpc_addr: String,

    /// Upstream predictor `host[:port]`. Without it every model is served locally.
    #[arg(long, env = "PREDICTOR_HOST")]
    pub predictor_host: Option<String>,

    /// v1, v2 or grpc-v2
    #[arg(long, env = "PREDICTOR_PROTOCOL", default_value = "v1")]
    pub predictor_protocol: PredictorProtocol,

    #[arg(long, env = "PREDICTOR_USE_SSL")]
    pub predictor_use_ssl: bool,

    #[arg(long, env = "PREDICTOR_TIMEOUT", default_value_t = 600)]
    pub predictor_timeout_secs: u64,

    /// Models forwarded to the predictor. Repeat or comma-separate.
    #[arg(long = "model-name", env = "MODEL_NAME", value_delimiter = ',')]
    pub model_names: Vec<String>,

    #[arg(long, env = "CE_SOURCE")]
    pub ce_source: Option<String>,

    #[arg(long, env = "CE_TYPE")]
    pub ce_type: Option<String>,

    #[arg(long, env = "CE_MERGE")]
    pub ce_merge: bool,

    #[arg(long, env = "OIP_MAX_REQUEST_BODY_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_request_body_bytes: usize,

    /// text or json
    #[arg(long, env = "OIP_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    #[arg(long, env = "OIP_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OIP_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
