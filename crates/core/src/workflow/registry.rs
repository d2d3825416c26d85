use crate::error::{WorkflowError, WorkflowResult};
use crate::model::ModelHandle;
use crate::state::State;
use crate::types::{OrgId, StepKind};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Work performed for every node of one (kind, identifier).
///
/// Handlers are stateless and shared by every run; they must not mutate the
/// organization id or the model handle they are given.
#[async_trait::async_trait]
pub trait StepHandler: Send + Sync {
    fn kind(&self) -> StepKind;

    fn identifier(&self) -> &str;

    /// Reject a parsed config before any attempt is made.
    ///
    /// Failing here rejects the whole run instead of being retried.
    fn check_config(&self, _config: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Produce the partial state this node contributes to its descendants
    async fn process(
        &self,
        config: &serde_json::Value,
        state: &State,
        organization_id: &OrgId,
        model: &ModelHandle,
    ) -> Result<State>;
}

type HandlerKey = (StepKind, String);

/// Lookup from (kind, identifier) to handler.
///
/// Filled once at startup; the executor only ever reads it through an `Arc`.
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own (kind, identifier)
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> WorkflowResult<()> {
        let key = (handler.kind(), handler.identifier().to_string());
        if self.handlers.contains_key(&key) {
            return Err(WorkflowError::DuplicateHandler {
                kind: key.0,
                identifier: key.1,
            });
        }

        tracing::debug!("Registered handler {}/{}", key.0, key.1);
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Build a registry from a fixed list of handlers
    pub fn from_handlers(
        handlers: impl IntoIterator<Item = Arc<dyn StepHandler>>,
    ) -> WorkflowResult<Self> {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Get a handler, if registered
    pub fn get(&self, kind: StepKind, identifier: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&(kind, identifier.to_string())).cloned()
    }

    /// Get a handler or fail with `HandlerNotFound`
    pub fn resolve(&self, kind: StepKind, identifier: &str) -> WorkflowResult<Arc<dyn StepHandler>> {
        self.get(kind, identifier)
            .ok_or_else(|| WorkflowError::HandlerNotFound {
                kind,
                identifier: identifier.to_string(),
            })
    }

    pub fn contains(&self, kind: StepKind, identifier: &str) -> bool {
        self.handlers.contains_key(&(kind, identifier.to_string()))
    }

    /// Registered keys, sorted for stable output
    pub fn keys(&self) -> Vec<(StepKind, String)> {
        let mut keys: Vec<_> = self.handlers.keys().cloned().collect();
        keys.sort_by(|a, b| (a.0.as_str(), &a.1).cmp(&(b.0.as_str(), &b.1)));
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        kind: StepKind,
        identifier: &'static str,
    }

    #[async_trait::async_trait]
    impl StepHandler for Noop {
        fn kind(&self) -> StepKind {
            self.kind
        }

        fn identifier(&self) -> &str {
            self.identifier
        }

        async fn process(
            &self,
            _config: &serde_json::Value,
            _state: &State,
            _organization_id: &OrgId,
            _model: &ModelHandle,
        ) -> Result<State> {
            Ok(State::new())
        }
    }

    fn noop(kind: StepKind, identifier: &'static str) -> Arc<dyn StepHandler> {
        Arc::new(Noop { kind, identifier })
    }

    #[test]
    fn test_resolve_by_kind_and_identifier() {
        let registry = HandlerRegistry::from_handlers([
            noop(StepKind::GenerateImage, "dalle"),
            noop(StepKind::GenerateVideo, "dalle"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        let handler = registry.resolve(StepKind::GenerateVideo, "dalle").unwrap();
        assert_eq!(handler.kind(), StepKind::GenerateVideo);
        assert!(!registry.contains(StepKind::Publish, "dalle"));
    }

    #[test]
    fn test_lookup_miss_is_typed() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve(StepKind::Publish, "tiktok").err().unwrap();
        assert!(matches!(
            err,
            WorkflowError::HandlerNotFound { kind: StepKind::Publish, ref identifier } if identifier == "tiktok"
        ));
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(noop(StepKind::Trigger, "manual")).unwrap();

        let result = registry.register(noop(StepKind::Trigger, "manual"));
        assert!(matches!(result, Err(WorkflowError::DuplicateHandler { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_keys_sorted() {
        let registry = HandlerRegistry::from_handlers([
            noop(StepKind::Trigger, "webhook"),
            noop(StepKind::Publish, "x"),
            noop(StepKind::Trigger, "manual"),
        ])
        .unwrap();

        let keys = registry.keys();
        assert_eq!(keys[0], (StepKind::Publish, "x".to_string()));
        assert_eq!(keys[1], (StepKind::Trigger, "manual".to_string()));
        assert_eq!(keys[2], (StepKind::Trigger, "webhook".to_string()));
    }
}
