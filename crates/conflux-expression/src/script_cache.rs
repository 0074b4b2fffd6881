//! Compiled script cache.
//!
//! Scripts are compiled once per process definition and kept in a shell
//! keyed by definition id. Each shell maps the SHA-256 of the script source
//! to its compiled form. Undeploying a definition drops its shell.

use dashmap::DashMap;
use jexl_parser::ast::Expression as Ast;
use jexl_parser::Parser;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::ExpressionError;

/// A script that parsed, with the identifiers it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
    source: String,
    hash: [u8; 32],
    identifiers: BTreeSet<String>,
}

impl CompiledScript {
    /// SHA-256 of a script source
    pub fn hash_source(source: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.finalize().into()
    }

    /// Parse the script and collect its free identifiers
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let invalid = |reason: String| ExpressionError::InvalidExpression {
            name: "script".to_string(),
            reason,
        };

        if source.trim().is_empty() {
            return Err(invalid("script source is empty".to_string()));
        }

        let ast = Parser::parse(source).map_err(|e| invalid(format!("parse error: {}", e)))?;
        let mut identifiers = BTreeSet::new();
        collect_identifiers(&ast, &mut identifiers);

        Ok(Self {
            source: source.to_string(),
            hash: Self::hash_source(source),
            identifiers,
        })
    }

    /// Original source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// SHA-256 of the source
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Free identifiers the script reads
    pub fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }
}

/// Top-level names only: dot members, transform names and filter fields
/// are resolved against values, not the binding
fn collect_identifiers(ast: &Ast, out: &mut BTreeSet<String>) {
    match ast {
        Ast::Identifier(name) => {
            out.insert(name.clone());
        }
        Ast::Number(_) | Ast::String(_) | Ast::Boolean(_) => {}
        Ast::Array(items) => items.iter().for_each(|item| collect_identifiers(item, out)),
        Ast::Object(entries) => entries
            .iter()
            .for_each(|(_, value)| collect_identifiers(value, out)),
        Ast::BinaryOperation { left, right, .. } => {
            collect_identifiers(left, out);
            collect_identifiers(right, out);
        }
        Ast::Transform { subject, args, .. } => {
            collect_identifiers(subject, out);
            for arg in args.iter().flatten() {
                collect_identifiers(arg, out);
            }
        }
        Ast::DotOperation { subject, .. } => collect_identifiers(subject, out),
        Ast::IndexOperation { subject, index } => {
            collect_identifiers(subject, out);
            collect_identifiers(index, out);
        }
        Ast::Conditional {
            left,
            truthy,
            falsy,
        } => {
            collect_identifiers(left, out);
            collect_identifiers(truthy, out);
            collect_identifiers(falsy, out);
        }
        Ast::Filter { right, .. } => collect_identifiers(right, out),
    }
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that compiled the script
    pub misses: u64,
    /// Live definition shells
    pub shells: usize,
    /// Compiled scripts across all shells
    pub entries: usize,
}

/// Cache of compiled scripts, shared by all instances of a definition
pub trait ScriptCache: Send + Sync {
    /// Return the compiled script, compiling it on first use
    fn get_or_compile(
        &self,
        definition_id: &str,
        source: &str,
    ) -> Result<Arc<CompiledScript>, ExpressionError>;

    /// Drop the shell of one definition
    fn clear_definition(&self, definition_id: &str);

    /// Drop every shell
    fn clear(&self);

    /// Current counters
    fn stats(&self) -> ScriptCacheStats;
}

#[derive(Debug, Default)]
struct ScriptShell {
    scripts: DashMap<[u8; 32], Arc<CompiledScript>>,
}

/// Process-wide in-memory cache
#[derive(Debug, Default)]
pub struct InMemoryScriptCache {
    shells: DashMap<String, Arc<ScriptShell>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryScriptCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptCache for InMemoryScriptCache {
    fn get_or_compile(
        &self,
        definition_id: &str,
        source: &str,
    ) -> Result<Arc<CompiledScript>, ExpressionError> {
        let hash = CompiledScript::hash_source(source);
        let shell = self
            .shells
            .entry(definition_id.to_string())
            .or_default()
            .value()
            .clone();

        if let Some(script) = shell.scripts.get(&hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(script.value().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        // compiled outside any map lock; a concurrent first use may compile twice
        let compiled = Arc::new(CompiledScript::compile(source)?);
        let script = shell.scripts.entry(hash).or_insert(compiled).value().clone();
        Ok(script)
    }

    fn clear_definition(&self, definition_id: &str) {
        if let Some((_, shell)) = self.shells.remove(definition_id) {
            debug!(
                definition_id,
                scripts = shell.scripts.len(),
                "Dropped script shell"
            );
        }
    }

    fn clear(&self) {
        self.shells.clear();
    }

    fn stats(&self) -> ScriptCacheStats {
        ScriptCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shells: self.shells.len(),
            entries: self.shells.iter().map(|s| s.scripts.len()).sum(),
        }
    }
}

/// Cache that never retains anything
#[derive(Debug, Default)]
pub struct NoopScriptCache {
    misses: AtomicU64,
}

impl NoopScriptCache {
    /// Create a no-op cache
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptCache for NoopScriptCache {
    fn get_or_compile(
        &self,
        _definition_id: &str,
        source: &str,
    ) -> Result<Arc<CompiledScript>, ExpressionError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(CompiledScript::compile(source)?))
    }

    fn clear_definition(&self, _definition_id: &str) {}

    fn clear(&self) {}

    fn stats(&self) -> ScriptCacheStats {
        ScriptCacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..ScriptCacheStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_collects_identifiers() {
        let script = CompiledScript::compile("amount * rate + order.total > 'limit' && true").unwrap();
        let identifiers: Vec<_> = script.identifiers().iter().cloned().collect();
        assert_eq!(identifiers, vec!["amount", "order", "rate"]);
    }

    #[test]
    fn test_compile_rejects_broken_sources() {
        assert!(CompiledScript::compile("   ").is_err());
        assert!(CompiledScript::compile("(a + b").is_err());
        assert!(CompiledScript::compile("a + b)").is_err());
        assert!(CompiledScript::compile("name == 'open").is_err());
        assert!(CompiledScript::compile("name == 'it\\'s'").is_ok());

        for source in ["amount >", "amount amount", "* 3", "a ==== b"] {
            let err = CompiledScript::compile(source).unwrap_err();
            assert!(
                matches!(err, ExpressionError::InvalidExpression { ref reason, .. } if reason.starts_with("parse error")),
                "{} compiled",
                source
            );
        }
    }

    #[test]
    fn test_member_and_transform_names_are_not_identifiers() {
        let script = CompiledScript::compile("items[.price > limit]|first(fallback) + order.total").unwrap();
        let identifiers: Vec<_> = script.identifiers().iter().cloned().collect();
        assert_eq!(identifiers, vec!["fallback", "items", "limit", "order"]);
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = InMemoryScriptCache::new();

        let first = cache.get_or_compile("def-1", "a + 1").unwrap();
        let second = cache.get_or_compile("def-1", "a + 1").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.shells, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_shells_are_per_definition() {
        let cache = InMemoryScriptCache::new();
        cache.get_or_compile("def-1", "a + 1").unwrap();
        cache.get_or_compile("def-2", "a + 1").unwrap();

        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().shells, 2);

        cache.clear_definition("def-1");
        assert_eq!(cache.stats().shells, 1);

        // def-2 still cached, def-1 recompiles
        cache.get_or_compile("def-2", "a + 1").unwrap();
        cache.get_or_compile("def-1", "a + 1").unwrap();
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_noop_cache_always_compiles() {
        let cache = NoopScriptCache::new();
        cache.get_or_compile("def-1", "a").unwrap();
        cache.get_or_compile("def-1", "a").unwrap();
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_concurrent_first_use() {
        let cache = Arc::new(InMemoryScriptCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_or_compile("def-1", "x * 2").unwrap())
            })
            .collect();

        let scripts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.stats().entries, 1);
        assert!(scripts.iter().all(|s| s.source() == "x * 2"));
    }
}
