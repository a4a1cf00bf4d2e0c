//! Resolved configuration documents.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::key::ConfigKey;

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str(""),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

/// Ordered property map (flattened, dotted keys).
pub type Properties = BTreeMap<String, PropertyValue>;

/// Configuration for one [`ConfigKey`] at one source revision.
///
/// Owned by the config server cache behind an `Arc` and replaced wholesale on
/// refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(flatten)]
    pub key: ConfigKey,

    /// Revision of the backing source (commit hash or content digest).
    #[serde(rename = "version")]
    pub source_revision: String,

    pub fetched_at: DateTime<Utc>,

    /// Source files that contributed, highest precedence first.
    #[serde(default)]
    pub sources: Vec<String>,

    pub properties: Properties,
}

impl ConfigDocument {
    pub fn new(
        key: ConfigKey,
        source_revision: impl Into<String>,
        properties: Properties,
        sources: Vec<String>,
    ) -> Self {
        Self {
            key,
            source_revision: source_revision.into(),
            fetched_at: Utc::now(),
            sources,
            properties,
        }
    }

    pub fn get(&self, property: &str) -> Option<&PropertyValue> {
        self.properties.get(property)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
