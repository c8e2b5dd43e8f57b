//! Plugin registries keyed by `(namespace, name)`.
//!
//! Registries are plain values built once at start-up; inserting a key that
//! is already present is an error instead of a silent overwrite.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("key collision: '{key}' is already registered")]
    KeyCollision { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey {
    pub namespace: String,
    pub name: String,
}

impl RegistryKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split a dotted key at its last dot: `a.b.c` is namespace `a.b`, name `c`.
    pub fn parse(key: &str) -> Self {
        match key.rsplit_once('.') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new("", key),
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// Insertion-ordered registry.
pub struct Registry<T> {
    entries: Vec<(RegistryKey, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: RegistryKey, value: T) -> Result<(), RegistryError> {
        let display = key.to_string();
        if self.index.contains_key(&display) {
            return Err(RegistryError::KeyCollision { key: display });
        }
        self.index.insert(display, self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RegistryKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parse_splits_at_last_dot() {
        let key = RegistryKey::parse("diag.cpu.load");
        assert_eq!(key.namespace, "diag.cpu");
        assert_eq!(key.name, "load");
        assert_eq!(key.to_string(), "diag.cpu.load");

        let bare = RegistryKey::parse("msglog");
        assert_eq!(bare.namespace, "");
        assert_eq!(bare.to_string(), "msglog");
    }

    #[test]
    fn test_insert_rejects_collision() {
        let mut registry = Registry::new();
        registry.insert(RegistryKey::new("core", "a"), 1).unwrap();
        registry.insert(RegistryKey::new("core", "b"), 2).unwrap();

        let err = registry
            .insert(RegistryKey::new("core", "a"), 3)
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::KeyCollision {
                key: "core.a".to_string()
            }
        );
        assert_eq!(registry.get("core.a"), Some(&1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_iteration_keeps_insertion_order() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.insert(RegistryKey::new("ns", name), ()).unwrap();
        }
        let names: Vec<String> = registry.keys().map(|k| k.name.clone()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }
}
