//! Search path expansion and layer merging.
//!
//! # Design Decisions
//! - Templates are listed highest precedence first; the first layer wins a key
//! - The shared `application` files apply to every application
//! - Candidates are de-duplicated so a profile of `default` cannot load a file twice

use crate::model::{ConfigKey, Properties};
use crate::store::format::EXTENSIONS;

/// Default search templates, highest precedence first.
pub const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "{application}/{profile}",
    "{application}-{profile}",
    "{application}",
    "application-{profile}",
    "application",
];

/// One parsed source file.
#[derive(Debug, Clone)]
pub struct Layer {
    pub path: String,
    pub properties: Properties,
}

/// Expands search path templates for a key.
#[derive(Debug, Clone)]
pub struct SearchPaths {
    templates: Vec<String>,
}

impl Default for SearchPaths {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_PATHS.iter().map(|s| s.to_string()).collect())
    }
}

impl SearchPaths {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    /// Candidate file paths for `key`, highest precedence first.
    pub fn candidates(&self, key: &ConfigKey) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for template in &self.templates {
            let stem = template
                .replace("{application}", &key.application)
                .replace("{profile}", &key.profile);
            for ext in EXTENSIONS {
                let path = format!("{}.{}", stem.trim_start_matches('/'), ext);
                if !out.contains(&path) {
                    out.push(path);
                }
            }
        }
        out
    }
}

/// Merge layers given highest precedence first.
///
/// Returns the merged properties and the contributing source paths.
pub fn merge_layers(layers: Vec<Layer>) -> (Properties, Vec<String>) {
    let sources = layers.iter().map(|l| l.path.clone()).collect();
    let mut merged = Properties::new();
    for layer in layers.into_iter().rev() {
        merged.extend(layer.properties);
    }
    (merged, sources)
}
