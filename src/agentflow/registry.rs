//! Generic component registry.
//!
//! [`Registry<T>`] stores named components with discovery metadata and
//! secondary lookups by category, tag, and substring search. Tools are the
//! primary tenant (see [`ToolRegistry`](crate::tool::ToolRegistry)), but the
//! registry is generic so agents, providers, or mappers can be catalogued
//! the same way.
//!
//! Registration is expected at init time; runtime mutation is allowed and
//! guarded. Lookups are pure — `get` never mutates component state.
//!
//! # Example
//!
//! ```rust
//! use agentflow::registry::{ComponentMetadata, Registry};
//! use std::sync::Arc;
//!
//! let registry: Registry<String> = Registry::new();
//! registry
//!     .register(
//!         Arc::new("hello".to_string()),
//!         ComponentMetadata::new("greeter", "Says hello")
//!             .with_category("demo")
//!             .with_tag("text"),
//!     )
//!     .unwrap();
//!
//! assert!(registry.get("greeter").is_some());
//! assert_eq!(registry.list_by_category("demo").len(), 1);
//! assert_eq!(registry.search("hel").len(), 1);
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Errors surfaced by registry mutation.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// A component with the same name is already registered.
    AlreadyRegistered(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(name) => {
                write!(f, "component already registered: {}", name)
            }
        }
    }
}

impl Error for RegistryError {}

/// Discovery metadata attached to a registered component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: String,
    pub tags: Vec<String>,
    /// Example usages, rendered into LLM-facing catalogues.
    pub examples: Vec<String>,
}

impl ComponentMetadata {
    /// Metadata with defaults (`version = "1.0.0"`, `category = "general"`).
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            category: "general".to_string(),
            tags: Vec::new(),
            examples: Vec::new(),
        }
    }

    /// Override the version (builder pattern).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Override the category (builder pattern).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Append a tag (builder pattern).
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Append an example (builder pattern).
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }
}

/// A registered component together with its metadata.
pub struct RegistryEntry<T: ?Sized> {
    pub metadata: ComponentMetadata,
    pub component: Arc<T>,
}

impl<T: ?Sized> Clone for RegistryEntry<T> {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            component: Arc::clone(&self.component),
        }
    }
}

impl<T: ?Sized> fmt::Debug for RegistryEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Thread-safe registry of named components.
pub struct Registry<T: ?Sized> {
    entries: RwLock<HashMap<String, RegistryEntry<T>>>,
}

impl<T: ?Sized> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a component under `metadata.name`.
    ///
    /// Fails when the name is already taken — uniqueness is enforced, never
    /// silently replaced.
    pub fn register(
        &self,
        component: Arc<T>,
        metadata: ComponentMetadata,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&metadata.name) {
            return Err(RegistryError::AlreadyRegistered(metadata.name.clone()));
        }
        entries.insert(
            metadata.name.clone(),
            RegistryEntry {
                metadata,
                component,
            },
        );
        Ok(())
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Option<RegistryEntry<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All entries, sorted by name for deterministic iteration.
    pub fn list(&self) -> Vec<RegistryEntry<T>> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        entries
    }

    /// Entries whose category matches exactly.
    pub fn list_by_category(&self, category: &str) -> Vec<RegistryEntry<T>> {
        self.list()
            .into_iter()
            .filter(|e| e.metadata.category == category)
            .collect()
    }

    /// Entries carrying the given tag.
    pub fn list_by_tag(&self, tag: &str) -> Vec<RegistryEntry<T>> {
        self.list()
            .into_iter()
            .filter(|e| e.metadata.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Case-insensitive substring search over name, description, and tags.
    pub fn search(&self, query: &str) -> Vec<RegistryEntry<T>> {
        let needle = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|e| {
                e.metadata.name.to_lowercase().contains(&needle)
                    || e.metadata.description.to_lowercase().contains(&needle)
                    || e.metadata.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Remove a component, returning its entry if it was present.
    pub fn unregister(&self, name: &str) -> Option<RegistryEntry<T>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
