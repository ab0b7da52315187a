//! Graph vertices and the identity they are keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a resource in the dependency graph.
///
/// Derived from the resource's fully qualified path (mount path plus resource name), so a
/// bare reference and the payload it eventually resolves to produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    /// Build a key from a path, ignoring leading, trailing and repeated `/`.
    pub fn from_path(path: &str) -> Self {
        let normalized =
            path.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>().join("/");
        Self(normalized)
    }

    /// Build a key from path segments, e.g. a mount path and a resource name.
    pub fn from_segments<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::from_path(&segments.into_iter().collect::<Vec<_>>().join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(path: &str) -> Self {
        Self::from_path(path)
    }
}

impl From<String> for NodeKey {
    fn from(path: String) -> Self {
        Self::from_path(&path)
    }
}

impl AsRef<str> for NodeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A payload that can occupy a node of the dependency graph.
pub trait Identified {
    /// The identity this payload is stored under.
    fn node_key(&self) -> NodeKey;
}

/// A graph vertex: either a full payload or a placeholder holding only the identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<P> {
    Full(P),
    Placeholder(NodeKey),
}

impl<P: Identified> Node<P> {
    pub fn full(payload: P) -> Self {
        Node::Full(payload)
    }

    pub fn placeholder(key: NodeKey) -> Self {
        Node::Placeholder(key)
    }

    pub fn key(&self) -> NodeKey {
        match self {
            Node::Full(payload) => payload.node_key(),
            Node::Placeholder(key) => key.clone(),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Node::Full(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Node::Placeholder(_))
    }

    pub fn payload(&self) -> Option<&P> {
        match self {
            Node::Full(payload) => Some(payload),
            Node::Placeholder(_) => None,
        }
    }

    /// Drop the payload, keeping only the identity.
    pub fn to_placeholder(&self) -> Self {
        Node::Placeholder(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named(&'static str);

    impl Identified for Named {
        fn node_key(&self) -> NodeKey {
            NodeKey::from_path(self.0)
        }
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(NodeKey::from_path("/pki//root/"), NodeKey::from_path("pki/root"));
        assert_eq!(NodeKey::from_segments(["pki", "root"]).as_str(), "pki/root");
        assert_eq!(NodeKey::from_segments(["pki/", "/root"]).as_str(), "pki/root");
    }

    #[test]
    fn test_reference_and_payload_share_identity() {
        let reference = Node::<Named>::placeholder(NodeKey::from_path("pki/root"));
        let full = Node::full(Named("pki/root"));

        assert_eq!(reference.key(), full.key());
        assert!(full.is_full());
        assert!(reference.is_placeholder());
        assert_eq!(full.to_placeholder(), reference);
        assert!(reference.payload().is_none());
    }
}
