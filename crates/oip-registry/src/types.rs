use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use oip_common::{InferError, InferRequest, InferResponse, InferResult, ModelMetadata};

/// Operation family a model answers. Chat models are served by a separate
/// completion surface and reject tensor inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    #[default]
    Tensor,
    Chat,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Tensor => f.write_str("tensor"),
            ModelKind::Chat => f.write_str("chat"),
        }
    }
}

/// Contract every served model fulfils.
///
/// Models receive the decoded request by shared reference and must not rely
/// on mutating it. A model that `uses_predictor` is a thin proxy: the
/// dataplane forwards its calls to the configured upstream predictor instead
/// of invoking `predict`.
#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    fn ready(&self) -> bool;

    fn kind(&self) -> ModelKind {
        ModelKind::Tensor
    }

    fn uses_predictor(&self) -> bool {
        false
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata::empty(self.name())
    }

    async fn predict(&self, request: &InferRequest) -> InferResult<InferResponse>;

    async fn explain(&self, _request: &InferRequest) -> InferResult<InferResponse> {
        Err(InferError::UnsupportedOperation(format!(
            "model {} does not support explain",
            self.name()
        )))
    }
}

/// Name-keyed set of served models.
pub trait ModelRepository: Send + Sync {
    fn get_model(&self, name: &str) -> Option<Arc<dyn Model>>;

    /// Names of every registered model, sorted.
    fn list_models(&self) -> Vec<String>;

    /// Insert or replace the model registered under `model.name()`.
    fn update(&self, model: Arc<dyn Model>);

    fn remove(&self, name: &str) -> bool;

    fn is_model_ready(&self, name: &str) -> InferResult<bool> {
        self.get_model(name)
            .map(|m| m.ready())
            .ok_or_else(|| InferError::ModelNotFound(name.to_string()))
    }
}
