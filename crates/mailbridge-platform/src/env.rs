//! Environment variable abstraction.
//!
//! Config loading reads secrets from the environment through
//! [`Environment`] so tests can substitute a map.

use std::collections::HashMap;

/// Read access to environment-style key-value configuration.
pub trait Environment: Send + Sync {
    /// Get the value of a variable, or `None` if it is not set.
    fn get_var(&self, name: &str) -> Option<String>;
}

/// Process environment via [`std::env`].
pub struct NativeEnvironment;

impl Environment for NativeEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory environment for tests and embedding.
#[derive(Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl Environment for MapEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
