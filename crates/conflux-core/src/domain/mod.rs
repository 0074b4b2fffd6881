/// Domain events
pub mod events;

/// Flow node instances and their state machine
pub mod flow_node;

/// Join gateway arrival bookkeeping
pub mod gateway;

/// Process definitions
pub mod process_definition;

/// Process instances and their state machine
pub mod process_instance;

/// Collaborator traits
pub mod repository;

/// Dispatched work
pub mod work;
