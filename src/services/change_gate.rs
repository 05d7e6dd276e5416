//! Content-hash change detection for spec sub-trees.
//!
//! A sub-tree is hashed through its canonical JSON form: values are first
//! converted to [`serde_json::Value`], whose objects keep their keys sorted,
//! so the digest does not depend on field or map ordering.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::errors::DomainResult;

/// Hex SHA-256 of the canonical JSON encoding of `value`.
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> DomainResult<String> {
    let canonical = serde_json::to_value(value)?.to_string();
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Outcome of comparing a sub-tree with its last applied hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub converge: bool,
    pub hash: String,
}

/// Decides whether a sub-tree needs convergence.
///
/// `converge` is false iff the current hash equals `applied`. The returned
/// hash must only be persisted after a successful convergence.
pub fn should_converge<T: Serialize + ?Sized>(
    subtree: &T,
    applied: Option<&str>,
) -> DomainResult<GateDecision> {
    let hash = hash_json(subtree)?;
    Ok(GateDecision {
        converge: applied != Some(hash.as_str()),
        hash,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::domain::models::{MonitorSpec, ServerSpec};

    #[test]
    fn test_hash_is_stable_hex() {
        let servers = vec![ServerSpec::new("s0", "10.0.0.1")];
        let a = hash_json(&servers).unwrap();
        let b = hash_json(&servers.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_lowercase_hex_of_digest() {
        let expected: String = Sha256::digest(b"[]")
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(hash_json(&Vec::<u8>::new()).unwrap(), expected);
    }

    #[test]
    fn test_hash_ignores_map_order() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..32 {
            a.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            b.insert(format!("k{i}"), i);
        }
        assert_eq!(hash_json(&a).unwrap(), hash_json(&b).unwrap());
    }

    #[test]
    fn test_unchanged_subtree_skips() {
        let monitor = MonitorSpec::default();
        let first = should_converge(&monitor, None).unwrap();
        assert!(first.converge);

        let second = should_converge(&monitor, Some(&first.hash)).unwrap();
        assert!(!second.converge);
        assert_eq!(second.hash, first.hash);
    }

    #[test]
    fn test_mutation_flips_decision() {
        let mut monitor = MonitorSpec::default();
        let applied = hash_json(&monitor).unwrap();

        monitor.params = BTreeMap::from([("auto_failover".to_string(), "true".to_string())]);
        assert!(should_converge(&monitor, Some(&applied)).unwrap().converge);
    }
}
