//! Transition labels.
//!
//! A label is the string tag a node's finalize phase returns; the flow uses
//! it to select the next node from the successor table. The default label is
//! `"default"`, which is what a finalize that does not care about routing
//! should return.

use serde::{Deserialize, Serialize};

/// The label returned by phases that do not pick a branch explicitly.
pub const DEFAULT_LABEL: &str = "default";

/// A transition label produced by a node's finalize phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    /// Create a new label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Get the label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this is the `"default"` label.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_LABEL
    }
}

impl Default for Label {
    fn default() -> Self {
        Self(DEFAULT_LABEL.to_string())
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label() {
        let label = Label::default();
        assert_eq!(label.as_str(), "default");
        assert!(label.is_default());
    }

    #[test]
    fn test_label_from_str() {
        let label: Label = "search".into();
        assert_eq!(label.0, "search");
        assert!(!label.is_default());
    }

    #[test]
    fn test_label_from_string() {
        let label: Label = String::from("answer").into();
        assert_eq!(label.0, "answer");
    }

    #[test]
    fn test_label_equality() {
        let a: Label = "x".into();
        let b = Label::new("x");
        let c: Label = "y".into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_label_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Label::from("a"));
        set.insert(Label::from("b"));
        set.insert(Label::from("a"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_label_display() {
        let label = Label::new("retry_path");
        assert_eq!(format!("{}", label), "retry_path");
    }

    #[test]
    fn test_label_serialization() {
        let label = Label::new("done");
        let json = serde_json::to_string(&label).unwrap();
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(label, back);
    }
}
