//! Runtime registry of available harness adapters.

use std::collections::HashMap;

use super::claude_code::ClaudeCodeAdapter;
use super::codex::CodexAdapter;
use super::gemini::GeminiAdapter;
use super::trait_def::Harness;

/// Name of the harness used when a request names one that is not registered.
pub const DEFAULT_HARNESS: &str = "claude";

/// A collection of registered [`Harness`] implementations, keyed by name.
///
/// # Example
///
/// ```ignore
/// let registry = HarnessRegistry::with_defaults();
/// let harness = registry.resolve("codex");
/// ```
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: HashMap<String, Box<dyn Harness>>,
}

impl HarnessRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the three built-in adapters, using the
    /// binary names found on `$PATH`.
    pub fn with_defaults() -> Self {
        Self::with_binaries(&HashMap::new())
    }

    /// Create a registry holding the three built-in adapters, overriding the
    /// binary path for any harness named in `binaries`.
    pub fn with_binaries(binaries: &HashMap<String, String>) -> Self {
        let binary = |name: &str| binaries.get(name).cloned().unwrap_or_else(|| name.to_string());

        let mut registry = Self::new();
        registry.register(ClaudeCodeAdapter::with_binary(binary("claude")));
        registry.register(CodexAdapter::with_binary(binary("codex")));
        registry.register(GeminiAdapter::with_binary(binary("gemini")));
        registry
    }

    /// Register a harness adapter.
    ///
    /// The harness is stored under the name returned by [`Harness::name`].
    /// If a harness with the same name is already registered, it is
    /// replaced and the old one is returned.
    pub fn register(&mut self, harness: impl Harness + 'static) -> Option<Box<dyn Harness>> {
        let name = harness.name().to_string();
        self.harnesses.insert(name, Box::new(harness))
    }

    /// Look up a harness by name.
    pub fn get(&self, name: &str) -> Option<&dyn Harness> {
        self.harnesses.get(name).map(|b| b.as_ref())
    }

    /// Look up a harness by name, falling back to [`DEFAULT_HARNESS`] for
    /// unknown names.
    ///
    /// Returns `None` only if neither the requested harness nor the default
    /// is registered.
    pub fn resolve(&self, name: &str) -> Option<&dyn Harness> {
        self.get(name).or_else(|| {
            tracing::debug!(harness = name, "unknown harness, using default");
            self.get(DEFAULT_HARNESS)
        })
    }

    /// List the names of all registered harnesses.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.harnesses.keys().map(|s| s.as_str()).collect()
    }

    /// Return the number of registered harnesses.
    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    /// Return `true` if no harnesses are registered.
    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.harnesses.keys().collect::<Vec<_>>())
            .finish()
    }
}
