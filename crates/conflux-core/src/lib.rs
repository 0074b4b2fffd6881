//!
//! Conflux Core - process instance runtime for the Conflux engine
//!
//! This crate holds the process instance state machine, gateway
//! synchronization and abort propagation, together with the domain model
//! and the collaborator traits that storage and dispatch backends
//! implement.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - definitions, instances, flow nodes, gateways and events
pub mod domain;

/// Application services - instance controller and definition deployment
pub mod application;

/// Engine configuration
pub mod config;

/// Error types
pub mod error;

// Re-export key types
pub use config::{EngineConfig, ScriptCacheMode};
pub use error::CoreError;

pub use application::process_definition_service::ProcessDefinitionService;
pub use application::process_instance_controller::{CompletionTicket, ProcessInstanceController};
pub use application::{CompositeEventHandler, DomainEventHandler, NoopEventHandler};

pub use domain::events::{DomainEvent, FlowNodeStateChanged, GatewayFired, ProcessInstanceStateChanged};
pub use domain::flow_node::{
    Activation, FlowNodeInstance, FlowNodeInstanceId, FlowNodeState, FlowNodeType, ParentContainer,
};
pub use domain::gateway::{GatewayKey, GatewayRecord};
pub use domain::process_definition::{
    DataDefinition, FlowContainerDefinition, FlowNodeDefinition, FlowNodeKind, GatewayKind, NodeId,
    Operation, ProcessDefinition, ProcessDefinitionId, TransitionDefinition, TransitionId,
};
pub use domain::process_instance::{ProcessInstance, ProcessInstanceId, ProcessInstanceState};
pub use domain::repository::{
    ChangeSet, DefinitionResolver, PersistenceService, ResolutionProblem, ResolutionProblemKind,
    VariableWrite, WorkDispatcher, WorkHandler,
};
pub use domain::work::WorkItem;
