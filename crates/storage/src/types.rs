//! Common types used across storage operations.

use std::ops::Bound;

use bytes::Bytes;

/// Key-value pair returned from range queries.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use warden_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("refresh/family-index/f1/s1"), Bytes::new());
/// assert!(kv.key.starts_with(b"refresh/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Builds the key range covering every key that starts with `prefix`.
///
/// The upper bound is the shortest key greater than all keys with the
/// prefix: the prefix with its last non-`0xFF` byte incremented. A prefix
/// made only of `0xFF` bytes (or an empty prefix) has no such key, so the
/// range is unbounded above.
///
/// # Examples
///
/// ```
/// use std::ops::Bound;
/// use warden_storage::types::prefix_range;
///
/// let (start, end) = prefix_range(b"ab/");
/// assert_eq!(start, Bound::Included(b"ab/".to_vec()));
/// assert_eq!(end, Bound::Excluded(b"ab0".to_vec()));
/// ```
#[must_use]
pub fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = Bound::Included(prefix.to_vec());

    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return (start, Bound::Excluded(upper));
        }
    }

    (start, Bound::Unbounded)
}
