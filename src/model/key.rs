//! Configuration identity and key selectors.
//!
//! # Design Decisions
//! - Keys are plain value types (`Eq + Hash`) so they can index concurrent maps
//! - A pattern segment is either an exact value or the `*` wildcard; no globbing
//! - Validation rejects segments that could escape a repository directory or be
//!   mistaken for a command-line flag by the git CLI

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of one configuration document: `(application, profile, label)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Application name (e.g. `dataCatalog`).
    pub application: String,
    /// Profile (e.g. `prod`).
    pub profile: String,
    /// Branch, tag, or commit selecting the repository revision.
    pub label: String,
}

impl ConfigKey {
    pub fn new(
        application: impl Into<String>,
        profile: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            profile: profile.into(),
            label: label.into(),
        }
    }

    /// Check that every segment is safe to use as a file path component or git ref.
    pub fn validate(&self) -> Result<(), String> {
        validate_name("application", &self.application)?;
        validate_name("profile", &self.profile)?;
        validate_label(&self.label)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.application, self.profile, self.label)
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    if value.starts_with('-') || value.starts_with('.') {
        return Err(format!("{} must not start with '-' or '.': {}", field, value));
    }
    if value.contains(['/', '\\', ':', '\0']) || value.chars().any(char::is_control) {
        return Err(format!("{} contains an illegal character: {}", field, value));
    }
    Ok(())
}

fn validate_label(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("label must not be empty".to_string());
    }
    if value.starts_with('-') {
        return Err(format!("label must not start with '-': {}", value));
    }
    if value.starts_with('/') || value.ends_with('/') || value.contains("//") {
        return Err(format!("label has an empty path segment: {}", value));
    }
    if value.contains("..")
        || value.contains(['\\', ':', '\0', ' '])
        || value.chars().any(char::is_control)
    {
        return Err(format!("label contains an illegal sequence: {}", value));
    }
    Ok(())
}

/// One field of a [`KeyPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Matches every value.
    Any,
    /// Matches exactly this value.
    Exact(String),
}

impl Segment {
    /// Parse a segment; empty and `*` are wildcards.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "*" => Segment::Any,
            value => Segment::Exact(value.to_string()),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Exact(expected) => expected == value,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Segment::Any)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Any => f.write_str("*"),
            Segment::Exact(value) => f.write_str(value),
        }
    }
}

/// Error parsing a refresh destination.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key pattern '{0}': expected application[:profile[:label]]")]
pub struct PatternError(pub String);

/// Selector over [`ConfigKey`]s, rendered as `application:profile:label`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPattern {
    pub application: Segment,
    pub profile: Segment,
    pub label: Segment,
}

impl KeyPattern {
    pub fn new(application: Segment, profile: Segment, label: Segment) -> Self {
        Self {
            application,
            profile,
            label,
        }
    }

    /// Pattern matching every key.
    pub fn any() -> Self {
        Self::new(Segment::Any, Segment::Any, Segment::Any)
    }

    /// Pattern matching every profile and label of one application.
    pub fn application(name: impl Into<String>) -> Self {
        Self::new(Segment::Exact(name.into()), Segment::Any, Segment::Any)
    }

    pub fn matches(&self, key: &ConfigKey) -> bool {
        self.application.matches(&key.application)
            && self.profile.matches(&key.profile)
            && self.label.matches(&key.label)
    }

    pub fn is_any(&self) -> bool {
        self.application.is_any() && self.profile.is_any() && self.label.is_any()
    }
}

/// True if any pattern in the set selects `key`.
pub fn any_matches(patterns: &BTreeSet<KeyPattern>, key: &ConfigKey) -> bool {
    patterns.iter().any(|p| p.matches(key))
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.application, self.profile, self.label)
    }
}

impl FromStr for KeyPattern {
    type Err = PatternError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() > 3 {
            return Err(PatternError(raw.to_string()));
        }
        let segment = |i: usize| parts.get(i).map(|p| Segment::parse(p)).unwrap_or(Segment::Any);
        Ok(Self::new(segment(0), segment(1), segment(2)))
    }
}

impl TryFrom<String> for KeyPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyPattern> for String {
    fn from(pattern: KeyPattern) -> Self {
        pattern.to_string()
    }
}
