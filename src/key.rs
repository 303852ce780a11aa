//! Store keys and node addresses.
//!
//! A [`StoreKey`] names a node in the server's tree by its token path, a
//! `/`-separated list of segments such as `/users/ada/email`. The empty path
//! is the root (sentinel) node.
//!
//! Segments are escaped when they are joined into a path: `/`, `\` and
//! control characters become `\XX`, so a segment can never split into two
//! segments or into two command arguments.
use std::fmt;

use crate::value::{ESCAPE, push_escaped, unescape};

/// Server-assigned address of a key node. Stable for the life of the node,
/// including across moves of its ancestors.
pub type StoreAddress = u64;

const SEPARATOR: char = '/';

/// Escapes one segment for use in a token path.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for ch in segment.chars() {
        if ch < ' ' || ch == SEPARATOR || ch == ESCAPE as char {
            push_escaped(&mut out, ch as u8);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Reverses [`escape_segment`].
pub fn unescape_segment(escaped: &str) -> String {
    String::from_utf8_lossy(&unescape(escaped)).into_owned()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    path: String,
}

impl StoreKey {
    /// Wraps an already formed (escaped) token path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Builds `/seg1/seg2/...`, escaping each segment.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = Self::default();
        for segment in segments {
            key.push(segment.as_ref());
        }
        key
    }

    /// The escaped token path sent to the server.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The unescaped segments, root first.
    pub fn segments(&self) -> impl Iterator<Item = String> {
        self.path.split(SEPARATOR).skip(1).map(unescape_segment)
    }

    /// Appends one plain segment.
    pub fn push(&mut self, segment: &str) {
        self.path.push(SEPARATOR);
        self.path.push_str(&escape_segment(segment));
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut key = self.clone();
        key.push(segment);
        key
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for StoreKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for StoreKey {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_segments() {
        let key = StoreKey::from_segments(["client", "test", "key"]);
        assert_eq!(key.path(), "/client/test/key");
        assert_eq!(key.segments().collect::<Vec<_>>(), vec!["client", "test", "key"]);
    }

    #[test]
    fn root_key() {
        let root = StoreKey::from_segments(Vec::<String>::new());
        assert!(root.is_root());
        assert_eq!(root.segments().count(), 0);
        assert_eq!(root.child("a"), StoreKey::from("/a"));
    }

    #[test]
    fn child_keys() {
        let parent = StoreKey::new("/users");
        let child = parent.child("ada");
        assert_eq!(child.to_string(), "/users/ada");
        assert_eq!(parent.path(), "/users");
    }

    #[test]
    fn segments_are_escaped() {
        let key = StoreKey::from_segments(["a/b", "line\nbreak", "back\\slash"]);
        assert_eq!(key.path(), "/a\\2Fb/line\\0Abreak/back\\5Cslash");
        assert!(!key.path().contains('\n'));
        assert_eq!(
            key.segments().collect::<Vec<_>>(),
            vec!["a/b", "line\nbreak", "back\\slash"]
        );
    }

    #[test]
    fn unicode_segments_pass_through() {
        let key = StoreKey::new("/users").child("zoë");
        assert_eq!(key.path(), "/users/zoë");
        assert_eq!(escape_segment(""), "");
        assert_eq!(unescape_segment("x\\2fy"), "x/y");
    }
}
