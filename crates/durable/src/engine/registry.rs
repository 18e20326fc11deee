//! Workflow registry
//!
//! Maps workflow type names to the shared workflow implementation, so that a
//! run recorded in the ledger can be matched back to its code (for example
//! when reclaiming it from another process).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::workflow::Workflow;

/// Registry of workflow implementations keyed by type name
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow; a later registration of the same type replaces it
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        self.workflows
            .insert(workflow.workflow_type().to_string(), workflow);
    }

    /// Check if a workflow type is registered
    pub fn contains(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    /// Look up a workflow by type name
    pub fn get(&self, workflow_type: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(workflow_type).cloned()
    }

    /// Get the number of registered workflow types
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Get all registered workflow type names
    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChunkWriter;
    use crate::workflow::WorkflowError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopWorkflow;

    #[async_trait]
    impl Workflow for NoopWorkflow {
        fn workflow_type(&self) -> &'static str {
            "noop"
        }

        async fn run(&self, _input: Value, _writer: &mut ChunkWriter) -> Result<(), WorkflowError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = WorkflowRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(NoopWorkflow));

        assert!(registry.contains("noop"));
        assert!(!registry.contains("unknown"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("noop").unwrap().workflow_type(), "noop");
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_registry_debug() {
        let mut registry = WorkflowRegistry::new();
        registry.register(Arc::new(NoopWorkflow));

        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("noop"));

        let types: Vec<_> = registry.workflow_types().collect();
        assert_eq!(types, vec!["noop"]);
    }
}
