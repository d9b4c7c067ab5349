use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Classified failures shared by the codec, the envelope layer and the dataplane.
///
/// Every variant is raised where it is detected and travels unchanged to the
/// transport adapter, which maps it to an HTTP status or an RPC code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferError {
    /// Malformed envelope or tensor header, byte-count mismatch, textual FP16,
    /// missing required field.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Model with name {0} does not exist.")]
    ModelNotFound(String),

    /// Model present but not loaded, or the upstream predictor did not answer in time.
    #[error("Model is not ready: {0}")]
    ModelNotReady(String),

    #[error("{0}")]
    UnsupportedOperation(String),

    /// Upstream predictor answered with a failure status.
    #[error("upstream predictor returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Failure raised by the model itself.
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type InferResult<T> = Result<T, InferError>;

impl InferError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            InferError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            InferError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            InferError::ModelNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            InferError::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
            InferError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            InferError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for InferError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<InferError> for tonic::Status {
    fn from(err: InferError) -> Self {
        let msg = err.to_string();
        match err {
            InferError::InvalidInput(_) => tonic::Status::invalid_argument(msg),
            InferError::ModelNotFound(_) => tonic::Status::not_found(msg),
            InferError::ModelNotReady(_) => tonic::Status::unavailable(msg),
            InferError::UnsupportedOperation(_) => tonic::Status::unimplemented(msg),
            InferError::Upstream { .. } => tonic::Status::unavailable(msg),
            InferError::Inference(_) => tonic::Status::internal(msg),
        }
    }
}

impl From<tonic::Status> for InferError {
    fn from(status: tonic::Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            tonic::Code::InvalidArgument => InferError::InvalidInput(msg),
            tonic::Code::NotFound => InferError::ModelNotFound(msg),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => {
                InferError::ModelNotReady(msg)
            }
            tonic::Code::Unimplemented => InferError::UnsupportedOperation(msg),
            _ => InferError::Upstream {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                message: format!("{:?}: {msg}", status.code()),
            },
        }
    }
}
