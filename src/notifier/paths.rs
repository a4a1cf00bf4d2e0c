//! Mapping of changed repository paths to affected key patterns.
//!
//! # Design Decisions
//! - The mapping is policy, configured as templates over `{application}` and
//!   `{profile}`; nothing about a particular repository layout is hardcoded
//! - A stem that fits a template in several ways (e.g. `a-b-c` against
//!   `{application}-{profile}`) yields every split: refreshing too much is
//!   safe, refreshing too little is not
//! - The shared `application` stem affects every application
//! - Non-configuration files (README.md, CI files) map to nothing

use std::collections::BTreeSet;

use crate::model::{KeyPattern, Segment};
use crate::store::format;

/// Default path templates, matched against the path without its extension.
pub const DEFAULT_TEMPLATES: &[&str] = &[
    "{application}/{profile}",
    "{application}-{profile}",
    "{application}",
];

/// Name of the shared file that applies to every application.
const SHARED_APPLICATION: &str = "application";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Application,
    Profile,
}

#[derive(Debug, Clone)]
struct Template {
    parts: Vec<Part>,
}

impl Template {
    fn parse(raw: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = raw.trim_start_matches('/');
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('{') {
                let end = after
                    .find('}')
                    .ok_or_else(|| format!("unclosed placeholder in '{}'", raw))?;
                let part = match &after[..end] {
                    "application" => Part::Application,
                    "profile" => Part::Profile,
                    other => return Err(format!("unknown placeholder {{{}}} in '{}'", other, raw)),
                };
                if matches!(parts.last(), Some(Part::Application | Part::Profile)) {
                    return Err(format!("adjacent placeholders in '{}'", raw));
                }
                parts.push(part);
                rest = &after[end + 1..];
            } else {
                let end = rest.find('{').unwrap_or(rest.len());
                parts.push(Part::Literal(rest[..end].to_string()));
                rest = &rest[end..];
            }
        }

        let count = |p: &Part| parts.iter().filter(|x| *x == p).count();
        if count(&Part::Application) != 1 {
            return Err(format!("'{}' must contain {{application}} exactly once", raw));
        }
        if count(&Part::Profile) > 1 {
            return Err(format!("'{}' must contain {{profile}} at most once", raw));
        }
        Ok(Self { parts })
    }

    /// Every `(application, profile)` assignment that reproduces `stem`.
    fn captures(&self, stem: &str) -> Vec<(String, Option<String>)> {
        let mut out = Vec::new();
        capture(&self.parts, stem, None, None, &mut out);
        out
    }
}

fn capture(
    parts: &[Part],
    input: &str,
    app: Option<&str>,
    profile: Option<&str>,
    out: &mut Vec<(String, Option<String>)>,
) {
    let Some((first, rest)) = parts.split_first() else {
        if input.is_empty() {
            if let Some(app) = app {
                out.push((app.to_string(), profile.map(str::to_string)));
            }
        }
        return;
    };

    match first {
        Part::Literal(lit) => {
            if let Some(remaining) = input.strip_prefix(lit.as_str()) {
                capture(rest, remaining, app, profile, out);
            }
        }
        Part::Application | Part::Profile => {
            // Placeholders capture one non-empty path segment.
            let limit = input.find('/').unwrap_or(input.len());
            for end in (1..=limit).filter(|&i| input.is_char_boundary(i)) {
                let (value, remaining) = input.split_at(end);
                if *first == Part::Application {
                    capture(rest, remaining, Some(value), profile, out);
                } else {
                    capture(rest, remaining, app, Some(value), out);
                }
            }
        }
    }
}

/// Maps changed file paths to the key patterns they affect.
#[derive(Debug, Clone)]
pub struct PathMapper {
    templates: Vec<Template>,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self {
            templates: DEFAULT_TEMPLATES
                .iter()
                .filter_map(|t| Template::parse(t).ok())
                .collect(),
        }
    }
}

impl PathMapper {
    pub fn from_templates<S: AsRef<str>>(templates: &[S]) -> Result<Self, String> {
        if templates.is_empty() {
            return Err("at least one path template is required".to_string());
        }
        let templates = templates
            .iter()
            .map(|t| Template::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { templates })
    }

    /// Patterns affected by a change to `path`.
    pub fn map(&self, path: &str) -> BTreeSet<KeyPattern> {
        let mut out = BTreeSet::new();
        let path = path.trim_start_matches('/');
        if !format::is_config_file(path) {
            return out;
        }
        let Some((stem, _)) = path.rsplit_once('.') else {
            return out;
        };

        for template in &self.templates {
            for (app, profile) in template.captures(stem) {
                let application = if app == SHARED_APPLICATION {
                    Segment::Any
                } else {
                    Segment::Exact(app)
                };
                let profile = profile.map(Segment::Exact).unwrap_or(Segment::Any);
                out.insert(KeyPattern::new(application, profile, Segment::Any));
            }
        }
        out
    }

    /// Union of [`map`](Self::map) over every path.
    pub fn map_all<'a>(&self, paths: impl IntoIterator<Item = &'a String>) -> BTreeSet<KeyPattern> {
        paths.into_iter().flat_map(|p| self.map(p)).collect()
    }
}
