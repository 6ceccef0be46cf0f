//! Probe registry mapping configured names to probe factories.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::probe::ProbeFactory;
use crate::probe::http::HttpProbeFactory;
use crate::probe::tcp::TcpProbeFactory;

/// Separator marking a fully qualified external probe reference.
pub const QUALIFIER_SEPARATOR: char = '.';

/// Why a configured probe name could not be resolved.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Neither a builtin nor a qualified reference.
    #[error("probe '{0}' is not available")]
    NotFound(String),

    /// Qualified reference with no registered factory.
    #[error("external probe '{0}' is not registered")]
    NotRegistered(String),
}

/// Registry of constructible probes.
///
/// Builtins are addressed by short names (`tcp`, `http`). External probes
/// are registered under a qualified name such as `acme.probes.Queue`.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    builtins: HashMap<String, Arc<dyn ProbeFactory>>,
    external: HashMap<String, Arc<dyn ProbeFactory>>,
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builtins: Vec<_> = self.builtins.keys().collect();
        builtins.sort();
        let mut external: Vec<_> = self.external.keys().collect();
        external.sort();
        f.debug_struct("ProbeRegistry")
            .field("builtins", &builtins)
            .field("external", &external)
            .finish()
    }
}

impl ProbeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin probes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtin("tcp", TcpProbeFactory);
        registry.register_builtin("http", HttpProbeFactory::default());
        registry
    }

    /// Register a probe under a short builtin name.
    pub fn register_builtin(&mut self, name: impl Into<String>, factory: impl ProbeFactory) {
        let name = name.into();
        tracing::debug!(probe = %name, "Builtin probe registered");
        self.builtins.insert(name, Arc::new(factory));
    }

    /// Register a probe under a fully qualified name.
    pub fn register_external(&mut self, qualified: impl Into<String>, factory: impl ProbeFactory) {
        let qualified = qualified.into();
        tracing::debug!(probe = %qualified, "External probe registered");
        self.external.insert(qualified, Arc::new(factory));
    }

    /// Resolve a configured probe name.
    ///
    /// Builtins win; otherwise a name containing `.` is looked up as a
    /// qualified external reference.
    ///
    /// # Errors
    /// Returns `ResolveError` when neither lookup matches.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ProbeFactory>, ResolveError> {
        if let Some(factory) = self.builtins.get(name) {
            return Ok(Arc::clone(factory));
        }

        if name.contains(QUALIFIER_SEPARATOR) {
            return self
                .external
                .get(name)
                .map(Arc::clone)
                .ok_or_else(|| ResolveError::NotRegistered(name.to_string()));
        }

        Err(ResolveError::NotFound(name.to_string()))
    }

    /// Names of registered builtins, sorted.
    pub fn builtin_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.builtins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
