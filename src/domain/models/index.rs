//! Stable-keyed indices and the set difference between two of them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};

/// Ordered mapping from a stable ID to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index<T> {
    items: BTreeMap<String, T>,
}

impl<T> Default for Index<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }
}

impl<T> Index<T> {
    /// Builds an index keyed by `id`. Later items win on duplicate IDs.
    pub fn new<I, F>(items: I, id: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> String,
    {
        Self {
            items: items.into_iter().map(|item| (id(&item), item)).collect(),
        }
    }

    /// Looks up `id`, returning a not-found error when absent.
    pub fn get(&self, id: &str) -> DomainResult<&T> {
        self.items
            .get(id)
            .ok_or_else(|| DomainError::not_found("index entry", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.keys().map(String::as_str).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Keys present only in the current index, only in the previous one, and in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub rest: Vec<String>,
}

impl DiffResult {
    /// True when nothing needs to be created or deleted.
    pub fn is_converged(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }
}

/// Set difference by key between `current` and `previous`.
///
/// Both indices are sorted, so a single merge pass suffices.
pub fn diff<A, B>(current: &Index<A>, previous: &Index<B>) -> DiffResult {
    let mut result = DiffResult::default();
    let mut cur = current.items.keys().peekable();
    let mut prev = previous.items.keys().peekable();

    loop {
        match (cur.peek(), prev.peek()) {
            (Some(c), Some(p)) => match c.cmp(p) {
                std::cmp::Ordering::Less => {
                    result.added.push((*c).clone());
                    cur.next();
                }
                std::cmp::Ordering::Greater => {
                    result.deleted.push((*p).clone());
                    prev.next();
                }
                std::cmp::Ordering::Equal => {
                    result.rest.push((*c).clone());
                    cur.next();
                    prev.next();
                }
            },
            (Some(c), None) => {
                result.added.push((*c).clone());
                cur.next();
            }
            (None, Some(p)) => {
                result.deleted.push((*p).clone());
                prev.next();
            }
            (None, None) => break,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(ids: &[&str]) -> Index<String> {
        Index::new(ids.iter().map(ToString::to_string), Clone::clone)
    }

    #[test]
    fn test_diff_scenario() {
        let current = index(&["s0", "s1", "s2"]);
        let previous = index(&["s0", "s1", "s3"]);

        let result = diff(&current, &previous);
        assert_eq!(result.added, vec!["s2"]);
        assert_eq!(result.deleted, vec!["s3"]);
        assert_eq!(result.rest, vec!["s0", "s1"]);
        assert!(!result.is_converged());
    }

    #[test]
    fn test_diff_empty_sides() {
        let result = diff(&index(&["a", "b"]), &Index::<u8>::default());
        assert_eq!(result.added, vec!["a", "b"]);
        assert!(result.deleted.is_empty());

        let result = diff(&Index::<u8>::default(), &index(&["a"]));
        assert_eq!(result.deleted, vec!["a"]);
        assert!(result.rest.is_empty());
    }

    #[test]
    fn test_diff_identical_is_converged() {
        let result = diff(&index(&["x", "y"]), &index(&["y", "x"]));
        assert!(result.is_converged());
        assert_eq!(result.rest, vec!["x", "y"]);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let idx = index(&["s0"]);
        assert_eq!(idx.get("s0").unwrap(), "s0");
        assert!(idx.get("s9").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let idx = Index::new(vec![("a", 1), ("a", 2)], |(id, _)| (*id).to_string());
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get("a").unwrap().1, 2);
    }
}
