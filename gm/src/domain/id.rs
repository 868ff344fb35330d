//! Identifier generation
//!
//! Identifiers are `{prefix}-{uuid-v7}`: time ordered, so records sort by
//! creation when listed by id.

use tracing::debug;
use uuid::Uuid;

/// Generate a new identifier with the given kind prefix
///
/// Prefixes in use: `conv`, `msg`, `rm`, `goal`, `ms`, `act`, `ci`.
pub fn generate_id(prefix: &str) -> String {
    let id = format!("{}-{}", prefix, Uuid::now_v7().simple());
    debug!(%prefix, %id, "generate_id: called");
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_has_prefix() {
        let id = generate_id("ms");
        assert!(id.starts_with("ms-"));
        assert_eq!(id.len(), "ms-".len() + 32);
    }

    #[test]
    fn test_generate_id_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| generate_id("act")).collect();
        assert_eq!(ids.len(), 100);
    }
}
