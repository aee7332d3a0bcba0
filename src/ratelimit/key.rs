//! Limiter key generation.

/// Namespace prepended to every caller identifier.
pub const KEY_PREFIX: &str = "limiter:";

/// A key that uniquely identifies a caller's limiter state.
///
/// The key is the caller identifier (network address or API token) under the
/// `limiter:` namespace, so counters and block markers kept in a shared store
/// cannot collide with unrelated data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey(String);

impl LimiterKey {
    /// Create a new limiter key from a raw caller identifier.
    pub fn new(identifier: &str) -> Self {
        Self(format!("{}{}", KEY_PREFIX, identifier))
    }

    /// The namespaced key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
