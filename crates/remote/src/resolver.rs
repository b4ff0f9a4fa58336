//! Instance reachability.
//!
//! The engine never talks to a cloud provider. Whoever launched the instance
//! knows its address; that knowledge enters through [`InstanceResolver`].

use crate::error::{Error, Result};
use crate::types::Endpoint;
use std::collections::HashMap;

/// Maps an instance name to the endpoint a transport should use.
pub trait InstanceResolver: Send + Sync {
    /// Resolve `instance` or fail with [`Error::UnknownInstance`].
    fn resolve(&self, instance: &str) -> Result<Endpoint>;
}

/// Fixed inventory, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    endpoints: HashMap<String, Endpoint>,
}

impl StaticInventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an instance.
    pub fn insert(&mut self, name: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.insert(name.into(), endpoint);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.insert(name, endpoint);
        self
    }

    /// Number of known instances.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether the inventory is empty.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl FromIterator<(String, Endpoint)> for StaticInventory {
    fn from_iter<I: IntoIterator<Item = (String, Endpoint)>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

impl InstanceResolver for StaticInventory {
    fn resolve(&self, instance: &str) -> Result<Endpoint> {
        self.endpoints
            .get(instance)
            .cloned()
            .ok_or_else(|| Error::UnknownInstance(instance.to_string()))
    }
}
