//! Engine configuration
//!
//! Defaults, YAML loading and environment overrides.

use conflux_expression::{ExpressionEvaluator, InMemoryScriptCache, NoopScriptCache, ScriptCache};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::CoreError;

/// Which compiled-script cache the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptCacheMode {
    /// Process-wide cache shared by all instances of a definition
    #[default]
    InMemory,
    /// Compile on every evaluation
    Disabled,
}

impl FromStr for ScriptCacheMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in_memory" | "in-memory" | "memory" => Ok(ScriptCacheMode::InMemory),
            "disabled" | "none" | "off" => Ok(ScriptCacheMode::Disabled),
            other => Err(CoreError::Configuration(format!(
                "unknown script cache mode '{}'",
                other
            ))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Check evaluated values against declared return types
    #[serde(default)]
    pub check_return_types: bool,

    /// Compiled-script cache
    #[serde(default)]
    pub script_cache: ScriptCacheMode,

    /// Actor recorded on automatically completed flow nodes
    #[serde(default = "default_system_actor")]
    pub system_actor: String,

    /// Log filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_system_actor() -> String {
    "system".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_return_types: false,
            script_cache: ScriptCacheMode::default(),
            system_actor: default_system_actor(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden from the environment
    pub fn load() -> Self {
        let config = Self::default().with_overrides(|key| env::var(key).ok());
        info!(
            check_return_types = config.check_return_types,
            script_cache = ?config.script_cache,
            system_actor = %config.system_actor,
            "Engine configuration loaded"
        );
        config
    }

    /// Parse YAML, then apply environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config.with_overrides(|key| env::var(key).ok()))
    }

    /// Apply overrides from a variable lookup; invalid values are ignored
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("CONFLUX_CHECK_RETURN_TYPES") {
            match value.trim().parse::<bool>() {
                Ok(enabled) => self.check_return_types = enabled,
                Err(_) => warn!("Invalid CONFLUX_CHECK_RETURN_TYPES value: {}", value),
            }
        }

        if let Some(value) = lookup("CONFLUX_SCRIPT_CACHE") {
            match value.parse::<ScriptCacheMode>() {
                Ok(mode) => self.script_cache = mode,
                Err(_) => warn!("Invalid CONFLUX_SCRIPT_CACHE value: {}", value),
            }
        }

        if let Some(value) = lookup("CONFLUX_SYSTEM_ACTOR") {
            if value.trim().is_empty() {
                warn!("Invalid CONFLUX_SYSTEM_ACTOR value: empty");
            } else {
                self.system_actor = value;
            }
        }

        if let Some(value) = lookup("CONFLUX_LOG_FILTER") {
            self.log_filter = value;
        }

        self
    }

    /// Script cache selected by this configuration
    pub fn build_script_cache(&self) -> Arc<dyn ScriptCache> {
        match self.script_cache {
            ScriptCacheMode::InMemory => Arc::new(InMemoryScriptCache::new()),
            ScriptCacheMode::Disabled => Arc::new(NoopScriptCache::new()),
        }
    }

    /// Evaluator with every built-in dialect over the given cache
    pub fn build_evaluator(&self, script_cache: Arc<dyn ScriptCache>) -> ExpressionEvaluator {
        ExpressionEvaluator::new(script_cache).with_return_type_check(self.check_return_types)
    }
}
