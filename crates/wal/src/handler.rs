//! Backend handler seam.
//!
//! A handler executes one operation against one backend and reports a
//! structured outcome. This is the narrow interface behind which the real
//! services live (local daemon, object stores, storage markets); the
//! processor assumes nothing about a handler beyond this contract.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use stowage_core::{Backend, ErrorKind, Operation, OperationResult};

/// Structured outcome of one dispatch attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutcome {
    pub success: bool,
    pub cid: Option<String>,
    pub size: Option<i64>,
    pub destination: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

impl HandlerOutcome {
    /// Successful outcome with no payload.
    pub fn ok() -> HandlerOutcome {
        HandlerOutcome {
            success: true,
            ..Default::default()
        }
    }

    pub fn ok_with_cid(cid: impl Into<String>) -> HandlerOutcome {
        HandlerOutcome {
            success: true,
            cid: Some(cid.into()),
            ..Default::default()
        }
    }

    pub fn failed(kind: ErrorKind, error: impl Into<String>) -> HandlerOutcome {
        HandlerOutcome {
            success: false,
            error: Some(error.into()),
            error_type: Some(kind.as_str().to_string()),
            ..Default::default()
        }
    }

    /// The result payload recorded on a completed operation.
    pub fn result(&self) -> OperationResult {
        OperationResult {
            cid: self.cid.clone(),
            size: self.size,
            destination: self.destination.clone(),
        }
    }
}

/// Executes operations against one backend.
pub trait BackendHandler: Send + Sync {
    fn handle(&self, operation: &Operation) -> HandlerOutcome;
}

/// Thread-safe backend -> handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Backend, Arc<dyn BackendHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    pub fn register(&self, backend: Backend, handler: Arc<dyn BackendHandler>) {
        self.handlers.write().insert(backend, handler);
    }

    pub fn unregister(&self, backend: Backend) {
        self.handlers.write().remove(&backend);
    }

    pub fn get(&self, backend: Backend) -> Option<Arc<dyn BackendHandler>> {
        self.handlers.read().get(&backend).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::OperationType;

    struct EchoHandler;

    impl BackendHandler for EchoHandler {
        fn handle(&self, operation: &Operation) -> HandlerOutcome {
            HandlerOutcome::ok_with_cid(format!("cid-for-{}", operation.operation_type))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(Backend::Ipfs).is_none());
        registry.register(Backend::Ipfs, Arc::new(EchoHandler));
        let handler = registry.get(Backend::Ipfs).unwrap();
        let op = Operation::new(OperationType::Add, Backend::Ipfs);
        assert_eq!(handler.handle(&op).cid.as_deref(), Some("cid-for-add"));
        registry.unregister(Backend::Ipfs);
        assert!(registry.get(Backend::Ipfs).is_none());
    }

    #[test]
    fn failed_outcome_carries_stable_kind() {
        let outcome = HandlerOutcome::failed(ErrorKind::BackendUnavailable, "s3 down");
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("backend_unavailable"));
    }
}
