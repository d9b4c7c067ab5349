use async_trait::async_trait;

use oip_common::{InferError, InferRequest, InferResponse, InferResult, ModelMetadata};
use oip_registry::Model;

/// Registry entry for a model served entirely by the upstream predictor.
/// The dataplane forwards its calls, so `predict` is never reached in
/// normal operation.
#[derive(Debug, Clone)]
pub struct ForwardingModel {
    name: String,
}

impl ForwardingModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Model for ForwardingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready(&self) -> bool {
        true
    }

    fn uses_predictor(&self) -> bool {
        true
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata::empty(&self.name)
    }

    async fn predict(&self, _request: &InferRequest) -> InferResult<InferResponse> {
        Err(InferError::UnsupportedOperation(format!(
            "model {} has no local implementation",
            self.name
        )))
    }
}
