//! Category names and case-insensitive category sets.
//!
//! Equality, hashing and ordering of [`CategoryName`] all go through the
//! lowercased name, so membership tests and artifact sort order agree.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

/// Namespace prefix carried by every category name.
pub const CATEGORY_PREFIX: &str = "Category:";

/// A normalized, always-prefixed category name.
#[derive(Debug, Clone)]
pub struct CategoryName {
    name: String,
    key: String,
}

impl CategoryName {
    /// Normalize a raw name, adding the prefix when missing.
    ///
    /// Returns `None` for blank input (or a bare prefix).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let bare = match trimmed.get(..CATEGORY_PREFIX.len()) {
            Some(head) if head.eq_ignore_ascii_case(CATEGORY_PREFIX) => {
                trimmed[CATEGORY_PREFIX.len()..].trim()
            }
            _ => trimmed,
        };
        if bare.is_empty() {
            return None;
        }

        let name = format!("{CATEGORY_PREFIX}{bare}");
        let key = name.to_lowercase();
        Some(Self { name, key })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Case-folded comparison key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for CategoryName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CategoryName {}

impl Hash for CategoryName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for CategoryName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CategoryName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for CategoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for CategoryName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// A set of categories for one site, iterated in case-insensitive order.
///
/// The first spelling inserted for a name is the one kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySet {
    inner: BTreeSet<CategoryName>,
}

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a category; returns false if an equal name was already present.
    pub fn insert(&mut self, name: CategoryName) -> bool {
        self.inner.insert(name)
    }

    pub fn contains(&self, name: &CategoryName) -> bool {
        self.inner.contains(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sorted iteration.
    pub fn iter(&self) -> impl Iterator<Item = &CategoryName> {
        self.inner.iter()
    }

    pub fn intersection(&self, other: &CategorySet) -> CategorySet {
        self.inner.intersection(&other.inner).cloned().collect()
    }

    pub fn union(&self, other: &CategorySet) -> CategorySet {
        self.inner.union(&other.inner).cloned().collect()
    }

    /// Sorted display names.
    pub fn to_names(&self) -> Vec<String> {
        self.inner.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl FromIterator<CategoryName> for CategorySet {
    fn from_iter<I: IntoIterator<Item = CategoryName>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CategorySet {
    type Item = &'a CategoryName;
    type IntoIter = std::collections::btree_set::Iter<'a, CategoryName>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
