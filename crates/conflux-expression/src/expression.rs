//! The expression value object.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::value::ReturnType;

/// Expression dialect, selects the evaluation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// Literal parsed against the return type
    Constant,
    /// Named value from the data scope
    Variable,
    /// Unary or binary comparison over resolved dependencies
    Condition,
    /// `${name}` placeholder substitution
    Pattern,
    /// Ordered list of resolved dependencies
    List,
    /// Zero-argument accessor on one resolved dependency
    MethodCall,
    /// Embedded script
    Script,
    /// Engine-provided value such as the process instance id
    EngineConstant,
    /// Process definition parameter
    Parameter,
}

/// Immutable, typed expression tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expression {
    name: String,
    content: String,
    kind: ExpressionKind,
    return_type: ReturnType,
    #[serde(default)]
    dependencies: Vec<Expression>,
}

impl Expression {
    /// Create an expression from its parts
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        kind: ExpressionKind,
        return_type: ReturnType,
        dependencies: Vec<Expression>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            kind,
            return_type,
            dependencies,
        }
    }

    /// Literal constant
    pub fn constant(content: impl Into<String>, return_type: ReturnType) -> Self {
        let content = content.into();
        Self::new(content.clone(), content, ExpressionKind::Constant, return_type, Vec::new())
    }

    /// Reference to a data-scope variable
    pub fn variable(name: impl Into<String>, return_type: ReturnType) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, ExpressionKind::Variable, return_type, Vec::new())
    }

    /// Reference to a process definition parameter
    pub fn parameter(name: impl Into<String>, return_type: ReturnType) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, ExpressionKind::Parameter, return_type, Vec::new())
    }

    /// Reference to an engine constant such as `processInstanceId`
    pub fn engine_constant(name: impl Into<String>, return_type: ReturnType) -> Self {
        let name = name.into();
        Self::new(name.clone(), name, ExpressionKind::EngineConstant, return_type, Vec::new())
    }

    /// Binary comparison
    pub fn comparison(operator: &str, left: Expression, right: Expression) -> Self {
        let name = format!("{} {} {}", left.name, operator, right.name);
        Self::new(
            name,
            operator,
            ExpressionKind::Condition,
            ReturnType::Boolean,
            vec![left, right],
        )
    }

    /// Boolean negation
    pub fn not(operand: Expression) -> Self {
        let name = format!("!{}", operand.name);
        Self::new(name, "!", ExpressionKind::Condition, ReturnType::Boolean, vec![operand])
    }

    /// Placeholder template
    pub fn pattern(content: impl Into<String>, dependencies: Vec<Expression>) -> Self {
        let content = content.into();
        Self::new(
            content.clone(),
            content,
            ExpressionKind::Pattern,
            ReturnType::String,
            dependencies,
        )
    }

    /// List of the given expressions
    pub fn list(name: impl Into<String>, items: Vec<Expression>) -> Self {
        Self::new(name, "list", ExpressionKind::List, ReturnType::List, items)
    }

    /// Accessor call on a single target
    pub fn method_call(method: impl Into<String>, target: Expression, return_type: ReturnType) -> Self {
        let method = method.into();
        let name = format!("{}.{}()", target.name, method);
        Self::new(name, method, ExpressionKind::MethodCall, return_type, vec![target])
    }

    /// Embedded script with optional dependencies bound by name
    pub fn script(
        name: impl Into<String>,
        source: impl Into<String>,
        return_type: ReturnType,
        dependencies: Vec<Expression>,
    ) -> Self {
        Self::new(name, source, ExpressionKind::Script, return_type, dependencies)
    }

    /// Expression name, also the binding name when used as a dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Literal, operator, accessor or script source
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Dialect
    pub fn kind(&self) -> ExpressionKind {
        self.kind
    }

    /// Declared return type
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Ordered dependency expressions
    pub fn dependencies(&self) -> &[Expression] {
        &self.dependencies
    }

    /// Stable key of this expression inside one evaluation call.
    ///
    /// Structurally equal expressions share a discriminant, so a repeated
    /// sub-expression is evaluated once per call.
    pub fn discriminant(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
