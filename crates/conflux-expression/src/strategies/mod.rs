//! Built-in expression dialects, one strategy per `ExpressionKind`.

mod condition;
mod constant;
mod engine_constant;
mod list;
mod method_call;
mod parameter;
mod pattern;
mod script;
mod variable;

pub use condition::ConditionStrategy;
pub use constant::ConstantStrategy;
pub use engine_constant::EngineConstantStrategy;
pub use list::ListStrategy;
pub use method_call::MethodCallStrategy;
pub use parameter::ParameterStrategy;
pub use pattern::PatternStrategy;
pub use script::ScriptStrategy;
pub use variable::VariableStrategy;
