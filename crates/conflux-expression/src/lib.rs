//!
//! Conflux Expression - typed expression evaluation for the Conflux engine
//!
//! This crate defines the expression value object, the runtime value model
//! and a registry of evaluation strategies, one per expression dialect.
//! It knows nothing about process instances beyond the container context
//! attached to evaluation errors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Expression and script errors
pub mod error;

/// Evaluation context and resolved-expression cache
pub mod context;

/// Dispatching evaluator
pub mod evaluator;

/// Expression value object
pub mod expression;

/// Compiled script cache
pub mod script_cache;

/// Strategy interface
pub mod strategy;

/// Built-in dialects
pub mod strategies;

/// Runtime values and declared return types
pub mod value;

pub use context::{ContainerContext, ContainerType, EngineConstant, EvaluationContext, ResolvedExpressions};
pub use error::ExpressionError;
pub use evaluator::ExpressionEvaluator;
pub use expression::{Expression, ExpressionKind};
pub use script_cache::{
    CompiledScript, InMemoryScriptCache, NoopScriptCache, ScriptCache, ScriptCacheStats,
};
pub use strategy::ExpressionStrategy;
pub use value::{ReturnType, Value};
