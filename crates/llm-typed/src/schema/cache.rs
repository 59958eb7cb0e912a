//! Process-wide cache of compiled schemas.
//!
//! Compiling is deterministic, so two requests for the same structure
//! can share one [`CompiledSchema`]. Entries are keyed by the canonical
//! JSON of the descriptor, its registry, and the compile options, so
//! structurally equal descriptors hit the same entry no matter where
//! they were built.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use super::compile::{CompileOptions, CompiledSchema, compile};
use super::descriptor::{DescriptorRegistry, TypeDescriptor};
use crate::error::LlmError;

static GLOBAL: OnceLock<SchemaCache> = OnceLock::new();

/// A concurrency-safe map from structural key to compiled schema.
///
/// Readers never block each other. Two tasks that miss on the same key
/// at the same time may both compile; the first insert wins and both get
/// the same `Arc`.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, Arc<CompiledSchema>>>,
}

impl SchemaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide cache.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Returns the cached schema for this structure, compiling it on a
    /// miss.
    ///
    /// Compile errors are not cached.
    pub fn get_or_compile(
        &self,
        descriptor: &TypeDescriptor,
        registry: &DescriptorRegistry,
        options: CompileOptions,
    ) -> Result<Arc<CompiledSchema>, LlmError> {
        let key = structural_key(descriptor, registry, options)?;

        if let Some(hit) = self
            .entries
            .read()
            .expect("schema cache lock poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(compile(descriptor, registry, options)?);
        debug!(schema = %compiled.spec().name, "compiled schema");

        let mut entries = self.entries.write().expect("schema cache lock poisoned");
        Ok(Arc::clone(entries.entry(key).or_insert(compiled)))
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.entries.read().expect("schema cache lock poisoned").len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached schema.
    pub fn clear(&self) {
        self.entries
            .write()
            .expect("schema cache lock poisoned")
            .clear();
    }
}

fn structural_key(
    descriptor: &TypeDescriptor,
    registry: &DescriptorRegistry,
    options: CompileOptions,
) -> Result<String, LlmError> {
    serde_json::to_string(&(descriptor, registry, options))
        .map_err(|e| LlmError::unsupported(format!("descriptor is not serializable: {e}")))
}
