use serde::{Deserialize, Serialize};

/// Capability descriptor advertised by a triple container.
///
/// The transactional wrapper requires `size_accurate` (its overlay size
/// arithmetic depends on it) and rejects `handles_literal_typing` (its
/// deletion sets compare triples structurally, which must agree with the
/// base's membership predicate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `len()` reports the exact triple count.
    pub size_accurate: bool,
    /// `insert` is allowed.
    pub add_allowed: bool,
    /// `remove` is allowed.
    pub delete_allowed: bool,
    /// The store value-normalizes typed literals instead of comparing them
    /// structurally.
    pub handles_literal_typing: bool,
}

impl Capabilities {
    /// The descriptor of a mutable, structurally-comparing, size-accurate
    /// store.
    pub fn mutable() -> Self {
        Capabilities {
            size_accurate: true,
            add_allowed: true,
            delete_allowed: true,
            handles_literal_typing: false,
        }
    }

    /// The same capabilities with both write flags forced off.
    pub fn read_only(self) -> Self {
        Capabilities {
            add_allowed: false,
            delete_allowed: false,
            ..self
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::mutable()
    }
}
