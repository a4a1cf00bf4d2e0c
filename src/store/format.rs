//! Configuration file parsing.
//!
//! Every supported format is normalized to a flat [`Properties`] map with
//! dotted keys for nested mappings and `key[i]` for sequence elements.

use serde_json::Value;

use crate::model::{Properties, PropertyValue};

/// File extensions recognised as configuration, in lookup order.
pub const EXTENSIONS: &[&str] = &["yml", "yaml", "properties", "json", "toml"];

/// True if `path` ends in a recognised configuration extension.
pub fn is_config_file(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Parse `content` according to the extension of `path`.
pub fn parse(path: &str, content: &str) -> Result<Properties, String> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    let tree: Value = match ext {
        "yml" | "yaml" => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
            serde_json::to_value(yaml).map_err(|e| e.to_string())?
        }
        "json" => serde_json::from_str(content).map_err(|e| e.to_string())?,
        "toml" => {
            let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
            serde_json::to_value(table).map_err(|e| e.to_string())?
        }
        "properties" => return Ok(parse_properties(content)),
        other => return Err(format!("unsupported file extension '{}'", other)),
    };

    let mut out = Properties::new();
    match tree {
        Value::Null => {}
        Value::Object(_) => flatten("", &tree, &mut out),
        _ => return Err("document root must be a mapping".to_string()),
    }
    Ok(out)
}

fn flatten(prefix: &str, value: &Value, out: &mut Properties) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(&key, v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", prefix, i), v, out);
            }
        }
        Value::Null => {
            out.insert(prefix.to_string(), PropertyValue::Null);
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), PropertyValue::Bool(*b));
        }
        Value::Number(n) => {
            let v = match n.as_i64() {
                Some(i) => PropertyValue::Integer(i),
                None => PropertyValue::Float(n.as_f64().unwrap_or_default()),
            };
            out.insert(prefix.to_string(), v);
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), PropertyValue::String(s.clone()));
        }
    }
}

/// Java-style `.properties`: `key=value` or `key: value`, `#`/`!` comments,
/// trailing-backslash continuation lines.
fn parse_properties(content: &str) -> Properties {
    let mut out = Properties::new();
    let mut pending = String::new();

    for raw in content.lines() {
        let line = raw.trim_start();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);
        let entry = std::mem::take(&mut pending);

        let split = entry.find(['=', ':']);
        let (key, value) = match split {
            Some(i) => (&entry[..i], &entry[i + 1..]),
            None => (entry.as_str(), ""),
        };
        let key = key.trim();
        if !key.is_empty() {
            out.insert(key.to_string(), PropertyValue::String(value.trim().to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_flattening() {
        let yaml = r#"
server:
  port: 8080
  hosts:
    - a.example.com
    - b.example.com
catalog:
  enabled: true
  ratio: 0.25
  owner: ~
"#;
        let props = parse("dataCatalog/prod.yml", yaml).unwrap();
        assert_eq!(props["server.port"], PropertyValue::Integer(8080));
        assert_eq!(props["server.hosts[1]"], PropertyValue::String("b.example.com".into()));
        assert_eq!(props["catalog.enabled"], PropertyValue::Bool(true));
        assert_eq!(props["catalog.ratio"], PropertyValue::Float(0.25));
        assert_eq!(props["catalog.owner"], PropertyValue::Null);
    }

    #[test]
    fn test_empty_yaml_is_empty_document() {
        assert!(parse("app.yml", "").unwrap().is_empty());
    }

    #[test]
    fn test_properties_format() {
        let text = "# comment\n! also comment\nserver.port=8080\nname: catalog\nlong.value = first \\\n  second\nflag\n";
        let props = parse("app.properties", text).unwrap();
        assert_eq!(props["server.port"], PropertyValue::String("8080".into()));
        assert_eq!(props["name"], PropertyValue::String("catalog".into()));
        assert_eq!(props["long.value"], PropertyValue::String("first second".into()));
        assert_eq!(props["flag"], PropertyValue::String(String::new()));
    }

    #[test]
    fn test_toml_and_json() {
        let props = parse("app.toml", "[db]\nurl = \"postgres://x\"\npool = 4\n").unwrap();
        assert_eq!(props["db.url"], PropertyValue::String("postgres://x".into()));
        assert_eq!(props["db.pool"], PropertyValue::Integer(4));

        let props = parse("app.json", r#"{"a": {"b": [1, 2]}}"#).unwrap();
        assert_eq!(props["a.b[0]"], PropertyValue::Integer(1));
    }

    #[test]
    fn test_rejects_scalar_root_and_bad_syntax() {
        assert!(parse("app.yml", "just a string").is_err());
        assert!(parse("app.json", "{not json").is_err());
        assert!(parse("app.txt", "x=1").is_err());
    }

    #[test]
    fn test_is_config_file() {
        assert!(is_config_file("dataCatalog/prod.yml"));
        assert!(is_config_file("application.properties"));
        assert!(!is_config_file("README.md"));
        assert!(!is_config_file("Makefile"));
    }
}
