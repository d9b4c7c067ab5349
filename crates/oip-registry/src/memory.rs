use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{Model, ModelRepository};

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    models: Arc<DashMap<String, Arc<dyn Model>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: impl IntoIterator<Item = Arc<dyn Model>>) -> Self {
        let repo = Self::new();
        for model in models {
            repo.update(model);
        }
        repo
    }
}

impl ModelRepository for InMemoryRepository {
    fn get_model(&self, name: &str) -> Option<Arc<dyn Model>> {
        self.models.get(name).map(|m| Arc::clone(m.value()))
    }

    fn list_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn update(&self, model: Arc<dyn Model>) {
        let name = model.name().to_string();
        tracing::info!(model = %name, kind = %model.kind(), "model registered");
        self.models.insert(name, model);
    }

    fn remove(&self, name: &str) -> bool {
        let removed = self.models.remove(name).is_some();
        if removed {
            tracing::info!(model = %name, "model removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use oip_common::{InferError, InferRequest, InferResponse, InferResult};

    use super::*;
    use crate::types::ModelKind;

    struct Dummy {
        name: String,
        ready: AtomicBool,
    }

    #[async_trait]
    impl Model for Dummy {
        fn name(&self) -> &str {
            &self.name
        }

        fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn predict(&self, request: &InferRequest) -> InferResult<InferResponse> {
            Ok(InferResponse::new(&self.name, "", request.inputs.clone()))
        }
    }

    fn dummy(name: &str, ready: bool) -> Arc<Dummy> {
        Arc::new(Dummy {
            name: name.to_string(),
            ready: AtomicBool::new(ready),
        })
    }

    #[test]
    fn test_update_get_remove() {
        let repo = InMemoryRepository::new();
        repo.update(dummy("b", true));
        repo.update(dummy("a", false));
        assert_eq!(repo.list_models(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(repo.get_model("b").unwrap().kind(), ModelKind::Tensor);

        assert!(repo.remove("a"));
        assert!(!repo.remove("a"));
        assert!(repo.get_model("a").is_none());
    }

    #[test]
    fn test_readiness_follows_model_flag() {
        let model = dummy("m", false);
        let repo = InMemoryRepository::with_models([model.clone() as Arc<dyn Model>]);
        assert_eq!(repo.is_model_ready("m"), Ok(false));
        model.ready.store(true, Ordering::SeqCst);
        assert_eq!(repo.is_model_ready("m"), Ok(true));
        assert_eq!(
            repo.is_model_ready("missing"),
            Err(InferError::ModelNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_default_explain_is_unsupported() {
        let model = dummy("m", true);
        let err = model.explain(&InferRequest::new("m", vec![])).await.unwrap_err();
        assert!(matches!(err, InferError::UnsupportedOperation(_)));
    }
}
