//! Keys and their paths through the trie
//!
//! A key is a slash-delimited string. Each component of the key is expanded into a run of
//! base-4 digits, components are delimited by [SEPARATE], and a complete key ends with
//! [TERMINATE]. The two control digits never occur inside the expansion of a component, so
//! a position in a path can always be told apart as a branch digit, a boundary or the end.
use siphasher::sip::SipHasher24;
use std::{cmp::Ordering, hash::Hasher};

/// A single path digit, `0..=5`
pub type Digit = u8;

/// Number of distinct digits, and therefore the number of slots in a trie bucket
pub const DIGITS: usize = 6;

/// Digit marking the boundary between two key components
pub const SEPARATE: Digit = 4;

/// Digit marking the end of a key
pub const TERMINATE: Digit = 5;

/// Digits in the order in which the iterator visits them
pub const ORDER: [Digit; DIGITS] = [TERMINATE, SEPARATE, 0, 1, 2, 3];

/// How key components are turned into digits.
///
/// This is a property of the whole store and must never change for an existing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// every component is hashed with keyed SipHash-2-4, giving 32 digits per component
    Hash,
    /// the raw bytes of every component are expanded, so path order matches key order
    Lexint,
}

impl Default for PathMode {
    fn default() -> Self {
        Self::Hash
    }
}

impl PathMode {
    /// the path for a key
    ///
    /// `terminate` is false for prefix lookups.
    pub fn path(&self, key: &str, terminate: bool) -> Vec<Digit> {
        let components = components(key);
        let digits = match self {
            PathMode::Hash => components.len() * 32,
            PathMode::Lexint => key.len() * 4,
        };
        let mut path = Vec::with_capacity(digits + components.len() + 1);
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                path.push(SEPARATE);
            }
            match self {
                PathMode::Hash => expand(&hash(component.as_bytes()), &mut path),
                PathMode::Lexint => expand(component.as_bytes(), &mut path),
            }
        }
        if terminate {
            path.push(TERMINATE);
        }
        path
    }
}

fn hash(data: &[u8]) -> [u8; 8] {
    // all stores share the all-zero key, so paths are comparable between stores
    let mut hasher = SipHasher24::new_with_keys(0, 0);
    hasher.write(data);
    hasher.finish().to_le_bytes()
}

/// expand every byte into 4 digits, high bits first
fn expand(bytes: &[u8], out: &mut Vec<Digit>) {
    for byte in bytes {
        out.push((byte >> 6) & 3);
        out.push((byte >> 4) & 3);
        out.push((byte >> 2) & 3);
        out.push(byte & 3);
    }
}

/// strips a single leading slash
pub fn normalize_key(key: &str) -> &str {
    key.strip_prefix('/').unwrap_or(key)
}

/// the components of a key, without empty leading or trailing components
pub fn components(key: &str) -> Vec<&str> {
    let mut parts = key.split('/').collect::<Vec<_>>();
    while parts.last() == Some(&"") {
        parts.pop();
    }
    let leading = parts.iter().take_while(|part| part.is_empty()).count();
    parts.drain(..leading);
    parts
}

/// rank of a digit in iteration order
pub fn rank(digit: Digit) -> usize {
    match digit {
        TERMINATE => 0,
        SEPARATE => 1,
        d => d as usize + 2,
    }
}

/// compares two paths in iteration order
pub fn compare(a: &[Digit], b: &[Digit]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match rank(*x).cmp(&rank(*y)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_root() {
        assert!(PathMode::Hash.path("", false).is_empty());
        assert_eq!(PathMode::Hash.path("/", true), vec![TERMINATE]);
    }

    #[test]
    fn structure() {
        let path = PathMode::Hash.path("/a/b/", true);
        assert_eq!(path.len(), 32 + 1 + 32 + 1);
        assert_eq!(path[32], SEPARATE);
        assert_eq!(path[65], TERMINATE);
        assert!(path[..32].iter().all(|d| *d < SEPARATE));
        assert_eq!(PathMode::Hash.path("a/b", false), path[..65].to_vec());
    }

    #[test]
    fn lexint_expansion() {
        // 'a' = 0b01_10_00_01
        assert_eq!(PathMode::Lexint.path("a", true), vec![1, 2, 0, 1, TERMINATE]);
        assert_eq!(
            PathMode::Lexint.path("a/a", false),
            vec![1, 2, 0, 1, SEPARATE, 1, 2, 0, 1]
        );
    }

    #[test]
    fn known_collision() {
        assert_eq!(
            PathMode::Hash.path("idgcmnmna", true),
            PathMode::Hash.path("mpomeiehc", true)
        );
        assert_ne!(
            PathMode::Lexint.path("idgcmnmna", true),
            PathMode::Lexint.path("mpomeiehc", true)
        );
    }

    fn component_order(a: &str, b: &str) -> Ordering {
        components(a).cmp(&components(b))
    }

    fn key_from(parts: Vec<String>) -> String {
        parts
            .into_iter()
            .map(|part| part.replace('/', ""))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    #[quickcheck]
    fn lexint_order_matches_key_order(a: Vec<String>, b: Vec<String>) -> bool {
        let a = key_from(a);
        let b = key_from(b);
        let by_path = compare(
            &PathMode::Lexint.path(&a, true),
            &PathMode::Lexint.path(&b, true),
        );
        by_path == component_order(&a, &b)
    }
}
