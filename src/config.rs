//! Mapping file loading
//!
//! The mapping file is TOML. Every top-level table is one mapping; its
//! entries are quoted dotted keys mapped to dotted string values:
//!
//! ```toml
//! [MP1]
//! "nanoKONTROL2.CC.0.16.X" = "Synth.CC.0.74.X"
//! "LPD8.NOTEON.9.36.127"   = "[MP2]"
//! ```
//!
//! This module only produces the raw name → key → value tree, in file order.
//! Turning entries into rules is `crate::binding`'s job.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while reading the mapping file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("mapping \"{0}\" must be a table of rules")]
    NotATable(String),

    #[error("mapping \"{mapping}\": value for \"{key}\" must be a string")]
    NotAString { mapping: String, key: String },
}

/// One mapping as written in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMapping {
    pub name: String,
    /// `(dotted key, dotted value)` pairs in file order
    pub entries: Vec<(String, String)>,
}

/// The whole mapping file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTree {
    pub mappings: Vec<RawMapping>,
}

impl MappingTree {
    /// Get the default mapping file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stagesavvy")
            .join("Settings.toml")
    }

    /// Load the mapping file; a missing or unreadable file is an error
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse mapping file contents
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let document: toml::Table = toml::from_str(content)?;

        let mut mappings = Vec::with_capacity(document.len());
        for (name, value) in document {
            let toml::Value::Table(table) = value else {
                return Err(ConfigError::NotATable(name));
            };

            let mut entries = Vec::with_capacity(table.len());
            for (key, value) in table {
                let toml::Value::String(value) = value else {
                    return Err(ConfigError::NotAString { mapping: name, key });
                };
                entries.push((key, value));
            }

            mappings.push(RawMapping { name, entries });
        }

        Ok(Self { mappings })
    }

    pub fn rule_count(&self) -> usize {
        self.mappings.iter().map(|m| m.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_file_order() {
        let text = r#"
[MP2]
"Pad.NOTEON.9.36.127" = "[MP1]"

[MP1]
"Knobs.CC.0.16.X" = "Synth.CC.0.74.X"
"Knobs.CC.0.17.X" = "Synth.CC.0.71.X"
"#;
        let tree = MappingTree::parse(text).unwrap();
        let names: Vec<_> = tree.mappings.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["MP2", "MP1"]);
        assert_eq!(
            tree.mappings[1].entries,
            vec![
                ("Knobs.CC.0.16.X".to_string(), "Synth.CC.0.74.X".to_string()),
                ("Knobs.CC.0.17.X".to_string(), "Synth.CC.0.71.X".to_string()),
            ]
        );
        assert_eq!(tree.rule_count(), 3);
    }

    #[test]
    fn test_top_level_value_rejected() {
        let err = MappingTree::parse("default = \"MP1\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::NotATable(name) if name == "default"));
    }

    #[test]
    fn test_non_string_rule_rejected() {
        let err = MappingTree::parse("[MP1]\n\"Pad.CC.0.1.X\" = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::NotAString { .. }));
    }

    #[test]
    fn test_unquoted_dotted_key_rejected() {
        // Bare dotted keys become nested tables in TOML
        let err = MappingTree::parse("[MP1]\nPad.CC.0.1.X = \"Synth.CC.0.1.X\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::NotAString { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            MappingTree::parse("[MP1\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = MappingTree::load(Path::new("/nonexistent/stagesavvy/Settings.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
