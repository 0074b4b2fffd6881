//! Collaborator traits for the Conflux engine
//!
//! The engine consumes persistence, work scheduling and definition
//! resolution only through these traits. External crates implement them to
//! provide different backends.

use async_trait::async_trait;
use conflux_expression::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::flow_node::FlowNodeInstance;
use super::process_definition::{ProcessDefinition, ProcessDefinitionId};
use super::process_instance::ProcessInstance;
use super::work::WorkItem;
use crate::CoreError;

/// One variable written by a transition
#[derive(Debug, Clone, PartialEq)]
pub struct VariableWrite {
    /// Scope the variable lives in
    pub container_id: String,
    /// Variable name
    pub name: String,
    /// New value
    pub value: Value,
}

/// Everything one logical transition changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Process instance, when it changed
    pub process_instance: Option<ProcessInstance>,
    /// Changed or created flow nodes
    pub flow_nodes: Vec<FlowNodeInstance>,
    /// Variable writes, in order
    pub variables: Vec<VariableWrite>,
}

impl ChangeSet {
    /// Nothing to save
    pub fn is_empty(&self) -> bool {
        self.process_instance.is_none() && self.flow_nodes.is_empty() && self.variables.is_empty()
    }
}

/// Persistence collaborator.
///
/// The engine hands it one [`ChangeSet`] per logical transition and commits
/// its in-memory state only when `persist` succeeded.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Save a whole transition. Backends that can apply the changes
    /// atomically should override this.
    async fn persist(&self, changes: &ChangeSet) -> Result<(), CoreError> {
        if let Some(instance) = &changes.process_instance {
            self.save_process_instance(instance).await?;
        }
        for flow_node in &changes.flow_nodes {
            self.save_flow_node_instance(flow_node).await?;
        }
        for write in &changes.variables {
            self.append_to_variable_scope(&write.container_id, &write.name, &write.value)
                .await?;
        }
        Ok(())
    }

    /// Load a deployed definition
    async fn load_process_definition(
        &self,
        id: &ProcessDefinitionId,
    ) -> Result<Option<ProcessDefinition>, CoreError>;

    /// Store a definition on deployment
    async fn store_process_definition(&self, definition: &ProcessDefinition) -> Result<(), CoreError>;

    /// Remove a definition on undeployment
    async fn delete_process_definition(&self, id: &ProcessDefinitionId) -> Result<(), CoreError>;

    /// Save a process instance
    async fn save_process_instance(&self, instance: &ProcessInstance) -> Result<(), CoreError>;

    /// Save a flow node instance
    async fn save_flow_node_instance(&self, instance: &FlowNodeInstance) -> Result<(), CoreError>;

    /// Write one variable of a data scope
    async fn append_to_variable_scope(
        &self,
        container_id: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CoreError>;
}

/// Work dispatcher collaborator
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    /// Schedule work for later execution, in order, per container
    async fn enqueue(&self, container_id: &str, work: WorkItem) -> Result<(), CoreError>;
}

/// Executes work taken off a dispatcher
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Run one work item
    async fn handle_work(&self, work: WorkItem) -> Result<(), CoreError>;
}

/// What kind of configuration is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionProblemKind {
    /// Parameter without a value
    Parameter,
    /// Connector without an implementation
    Connector,
    /// Actor without a mapping
    Actor,
}

impl fmt::Display for ResolutionProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionProblemKind::Parameter => f.write_str("parameter"),
            ResolutionProblemKind::Connector => f.write_str("connector"),
            ResolutionProblemKind::Actor => f.write_str("actor"),
        }
    }
}

/// One unset piece of configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionProblem {
    /// Kind
    pub kind: ResolutionProblemKind,
    /// Parameter, connector or actor name
    pub name: String,
    /// Human readable description
    pub description: String,
}

impl ResolutionProblem {
    /// Create a problem
    pub fn new(kind: ResolutionProblemKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ResolutionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.kind, self.name, self.description)
    }
}

/// Definition resolution collaborator
#[async_trait]
pub trait DefinitionResolver: Send + Sync {
    /// Everything that prevents starting instances of the definition
    async fn get_resolution_problems(
        &self,
        definition_id: &ProcessDefinitionId,
    ) -> Result<Vec<ResolutionProblem>, CoreError>;
}
