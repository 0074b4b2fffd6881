//! Testing utilities for the Conflux engine.
//!
//! This crate provides definition builders, ready-made process fixtures,
//! mocks of the collaborator traits, a fault-injecting persistence
//! wrapper, an in-memory engine harness and assertion helpers.

pub mod assertions;
pub mod builders;
pub mod engine;
pub mod faults;
pub mod fixtures;
pub mod mocks;

/// Re-export commonly used types for convenience
pub use mockall;

pub use assertions::AssertionError;
pub use builders::{ContainerBuilder, DefinitionBuilder};
pub use engine::TestEngine;
pub use faults::FaultyPersistence;
