//! Dotted state paths.
//!
//! A [`StatePath`] is the ordered sequence of state names from the machine
//! root down to a node. The empty path denotes the root itself. Paths
//! serialize as dotted strings (`"parent.child.grandchild"`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path from the machine root to a state node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct StatePath(Vec<String>);

impl StatePath {
    /// The root path (empty segment list).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parses a dotted path string. Empty input yields the root path.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::root();
        }
        Self(s.split('.').map(|p| p.to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, if any.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    /// Returns a new path with `name` appended.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The prefix of the first `depth` segments.
    pub fn truncate(&self, depth: usize) -> Self {
        Self(self.0[..depth.min(self.0.len())].to_vec())
    }

    /// True if `self` starts with `prefix` (every path starts with the root).
    pub fn starts_with(&self, prefix: &StatePath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// True if `self` is a strict descendant of `ancestor`.
    pub fn is_strict_descendant_of(&self, ancestor: &StatePath) -> bool {
        self.0.len() > ancestor.0.len() && self.starts_with(ancestor)
    }

    /// Longest common prefix of two paths.
    pub fn common_prefix(&self, other: &StatePath) -> Self {
        let n = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Self(self.0[..n].to_vec())
    }

    /// Extends this path with additional segments.
    pub fn join(&self, segments: &[String]) -> Self {
        let mut out = self.0.clone();
        out.extend(segments.iter().cloned());
        Self(out)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<StatePath> for String {
    fn from(p: StatePath) -> Self {
        p.to_string()
    }
}

impl From<String> for StatePath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for StatePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}
