use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::events::{DomainEvent, ProcessInstanceStateChanged};
use super::process_definition::{ProcessDefinition, ProcessDefinitionId, STRING_INDEX_SLOTS};
use crate::CoreError;

/// Value object: Process instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessInstanceId(pub String);

impl ProcessInstanceId {
    /// Fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceState {
    /// Built, not yet initialized
    Created,
    /// Evaluating data defaults and creating start nodes
    Initializing,
    /// Executing
    Started,
    /// Last flow node finished
    Completing,
    /// Completed normally
    Completed,
    /// Cancel requested, flow nodes being aborted
    Cancelling,
    /// Cancelled
    Cancelled,
    /// Abort requested, flow nodes being aborted
    Aborting,
    /// Aborted
    Aborted,
}

impl ProcessInstanceState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessInstanceState::Completed
                | ProcessInstanceState::Cancelled
                | ProcessInstanceState::Aborted
        )
    }

    /// Whether a cancel or abort is in progress
    pub fn is_interrupting(&self) -> bool {
        matches!(
            self,
            ProcessInstanceState::Cancelling | ProcessInstanceState::Aborting
        )
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ProcessInstanceState) -> bool {
        use ProcessInstanceState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Started)
                | (Started, Completing)
                | (Started, Cancelling)
                | (Started, Aborting)
                | (Completing, Completed)
                | (Cancelling, Cancelled)
                | (Aborting, Aborted)
        )
    }

    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessInstanceState::Created => "CREATED",
            ProcessInstanceState::Initializing => "INITIALIZING",
            ProcessInstanceState::Started => "STARTED",
            ProcessInstanceState::Completing => "COMPLETING",
            ProcessInstanceState::Completed => "COMPLETED",
            ProcessInstanceState::Cancelling => "CANCELLING",
            ProcessInstanceState::Cancelled => "CANCELLED",
            ProcessInstanceState::Aborting => "ABORTING",
            ProcessInstanceState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ProcessInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification label slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringIndex {
    /// Label
    pub label: String,
    /// Value
    pub value: Option<String>,
}

/// Aggregate: Process instance
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// Unique identifier
    pub id: ProcessInstanceId,
    /// Definition this instance executes
    pub definition_id: ProcessDefinitionId,
    /// Definition name, for observers
    pub name: String,
    /// Current state
    pub state: ProcessInstanceState,
    /// Root container id; equal to the instance id
    pub root_container_id: String,
    /// Actor that started the instance
    pub started_by: Option<String>,
    /// Classification labels, slot `i` at position `i - 1`
    pub string_indexes: [Option<StringIndex>; STRING_INDEX_SLOTS],
    /// Set when a terminate end event interrupted the flow
    pub interrupting_event: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Reached STARTED
    pub started_at: Option<DateTime<Utc>>,
    /// Reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Domain events are not cloned
impl Clone for ProcessInstance {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            definition_id: self.definition_id.clone(),
            name: self.name.clone(),
            state: self.state,
            root_container_id: self.root_container_id.clone(),
            started_by: self.started_by.clone(),
            string_indexes: self.string_indexes.clone(),
            interrupting_event: self.interrupting_event,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        }
    }
}

impl PartialEq for ProcessInstance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.definition_id == other.definition_id
            && self.state == other.state
            && self.string_indexes == other.string_indexes
            && self.interrupting_event == other.interrupting_event
            && self.started_at == other.started_at
            && self.ended_at == other.ended_at
    }
}

impl ProcessInstance {
    /// Create a new process instance in CREATED
    pub fn new(definition: &ProcessDefinition, started_by: Option<String>) -> Self {
        let id = ProcessInstanceId::generate();
        let now = Utc::now();

        let mut string_indexes: [Option<StringIndex>; STRING_INDEX_SLOTS] = Default::default();
        for index in &definition.string_indexes {
            if let Some(slot) = index.index.checked_sub(1).and_then(|i| string_indexes.get_mut(i)) {
                *slot = Some(StringIndex {
                    label: index.label.clone(),
                    value: None,
                });
            }
        }

        let mut instance = Self {
            root_container_id: id.0.clone(),
            id,
            definition_id: definition.id.clone(),
            name: definition.name.clone(),
            state: ProcessInstanceState::Created,
            started_by,
            string_indexes,
            interrupting_event: false,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
            events: Vec::with_capacity(4),
        };

        instance.record_event(Box::new(ProcessInstanceStateChanged {
            process_instance_id: instance.id.clone(),
            old_state: None,
            new_state: ProcessInstanceState::Created,
            timestamp: now,
        }));

        instance
    }

    /// Move to `next`, recording a state change event
    pub fn transition_to(&mut self, next: ProcessInstanceState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(self.state_error(&format!("move to {}", next)));
        }

        let previous = self.state;
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if next == ProcessInstanceState::Started {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }

        self.record_event(Box::new(ProcessInstanceStateChanged {
            process_instance_id: self.id.clone(),
            old_state: Some(previous),
            new_state: next,
            timestamp: now,
        }));
        Ok(())
    }

    /// Error for an operation refused in the current state
    pub fn state_error(&self, operation: &str) -> CoreError {
        CoreError::ProcessInstanceState {
            process_instance_id: self.id.0.clone(),
            state: self.state.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Set the value of a classification label slot (1-based)
    pub fn set_string_index(&mut self, index: usize, value: Option<String>) -> Result<(), CoreError> {
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.string_indexes.get_mut(i))
            .ok_or_else(|| {
                CoreError::InvalidDefinition(format!(
                    "string index {} is outside 1..={}",
                    index, STRING_INDEX_SLOTS
                ))
            })?;

        let label = slot
            .as_ref()
            .map(|s| s.label.clone())
            .unwrap_or_else(|| format!("stringIndex{}", index));
        *slot = Some(StringIndex { label, value });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Value of a classification label slot (1-based)
    pub fn string_index(&self, index: usize) -> Option<&StringIndex> {
        index
            .checked_sub(1)
            .and_then(|i| self.string_indexes.get(i))
            .and_then(Option::as_ref)
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Take all recorded events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process_definition::{
        FlowContainerDefinition, FlowNodeDefinition, FlowNodeKind, StringIndexDefinition,
    };

    fn definition() -> ProcessDefinition {
        ProcessDefinition {
            id: ProcessDefinitionId("def-1".into()),
            name: "Claims".into(),
            version: "1".into(),
            container: FlowContainerDefinition {
                nodes: vec![FlowNodeDefinition::new("start", FlowNodeKind::StartEvent)],
                transitions: Vec::new(),
                data: Vec::new(),
            },
            actors: Vec::new(),
            parameters: Vec::new(),
            string_indexes: vec![StringIndexDefinition {
                index: 2,
                label: "region".into(),
                value: None,
            }],
        }
    }

    #[test]
    fn test_lifecycle_records_events() {
        let mut instance = ProcessInstance::new(&definition(), None);
        assert_eq!(instance.state, ProcessInstanceState::Created);

        instance.transition_to(ProcessInstanceState::Initializing).unwrap();
        instance.transition_to(ProcessInstanceState::Started).unwrap();
        instance.transition_to(ProcessInstanceState::Completing).unwrap();
        instance.transition_to(ProcessInstanceState::Completed).unwrap();

        assert!(instance.started_at.is_some());
        assert!(instance.ended_at.is_some());

        let events = instance.take_events();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.event_type() == "process_instance.state_changed"));
        assert!(instance.take_events().is_empty());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut instance = ProcessInstance::new(&definition(), None);
        assert!(matches!(
            instance.transition_to(ProcessInstanceState::Cancelling),
            Err(CoreError::ProcessInstanceState { .. })
        ));

        instance.transition_to(ProcessInstanceState::Initializing).unwrap();
        instance.transition_to(ProcessInstanceState::Started).unwrap();
        instance.transition_to(ProcessInstanceState::Cancelling).unwrap();
        assert!(instance.transition_to(ProcessInstanceState::Completing).is_err());
        instance.transition_to(ProcessInstanceState::Cancelled).unwrap();
        assert!(instance.transition_to(ProcessInstanceState::Cancelling).is_err());
    }

    #[test]
    fn test_string_indexes() {
        let mut instance = ProcessInstance::new(&definition(), None);
        assert_eq!(instance.string_index(2).map(|s| s.label.as_str()), Some("region"));

        instance.set_string_index(2, Some("EMEA".into())).unwrap();
        assert_eq!(
            instance.string_index(2).and_then(|s| s.value.as_deref()),
            Some("EMEA")
        );

        instance.set_string_index(5, Some("x".into())).unwrap();
        assert_eq!(instance.string_index(5).map(|s| s.label.as_str()), Some("stringIndex5"));

        assert!(instance.set_string_index(0, None).is_err());
        assert!(instance.set_string_index(6, None).is_err());
    }

    #[test]
    fn test_clone_drops_events() {
        let instance = ProcessInstance::new(&definition(), None);
        assert_eq!(instance.events.len(), 1);
        assert!(instance.clone().events.is_empty());
    }
}
