//! Fluent builders for process definitions.

pub mod definition;

pub use definition::{ContainerBuilder, DefinitionBuilder};
