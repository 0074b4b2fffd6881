use crate::{
    domain::process_definition::{ProcessDefinition, ProcessDefinitionId},
    domain::repository::PersistenceService,
    CoreError,
};
use conflux_expression::{ExpressionEvaluator, ScriptCache};
use std::sync::Arc;

/// Service for deploying process definitions
pub struct ProcessDefinitionService {
    /// Store for definitions
    persistence: Arc<dyn PersistenceService>,

    /// Evaluator used to validate expressions before deployment
    evaluator: Arc<ExpressionEvaluator>,

    /// Compiled scripts, one shell per deployed definition
    script_cache: Arc<dyn ScriptCache>,
}

impl ProcessDefinitionService {
    /// Create a new process definition service
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        evaluator: Arc<ExpressionEvaluator>,
        script_cache: Arc<dyn ScriptCache>,
    ) -> Self {
        Self {
            persistence,
            evaluator,
            script_cache,
        }
    }

    /// Validate and store a definition. Redeploying an id replaces it and
    /// drops its compiled scripts.
    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<ProcessDefinitionId, CoreError> {
        definition.validate(&|expression| self.evaluator.validate(expression))?;

        self.persistence.store_process_definition(&definition).await?;
        self.script_cache.clear_definition(&definition.id.0);

        tracing::info!(
            definition_id = %definition.id,
            version = %definition.version,
            nodes = definition.container.nodes.len(),
            "Process definition deployed"
        );

        Ok(definition.id)
    }

    /// Parse a YAML definition and deploy it
    pub async fn deploy_yaml(&self, yaml: &str) -> Result<ProcessDefinitionId, CoreError> {
        self.deploy(ProcessDefinition::from_yaml(yaml)?).await
    }

    /// Remove a definition and tear down its script shell
    pub async fn undeploy(&self, id: &ProcessDefinitionId) -> Result<(), CoreError> {
        if self.persistence.load_process_definition(id).await?.is_none() {
            return Err(CoreError::ProcessDefinitionNotFound(id.0.clone()));
        }

        self.persistence.delete_process_definition(id).await?;
        self.script_cache.clear_definition(&id.0);

        tracing::info!(definition_id = %id, "Process definition undeployed");
        Ok(())
    }

    /// Look up a deployed definition
    pub async fn definition(&self, id: &ProcessDefinitionId) -> Result<ProcessDefinition, CoreError> {
        self.persistence
            .load_process_definition(id)
            .await?
            .ok_or_else(|| CoreError::ProcessDefinitionNotFound(id.0.clone()))
    }
}
