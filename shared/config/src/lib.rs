pub mod error;
pub mod mappings;

pub use error::ConfigError;
pub use mappings::{FieldDecl, ForeignKeyDecl, IndexMapping, RelationDecl, TransformDecl, WhereDecl};

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Top-level YAML configuration: adapter instances (`in` / `out`), their
/// defaults, and the declarative index mappings.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default_in: Option<String>,

    #[serde(rename = "in", default)]
    pub inputs: HashMap<String, AdapterConfig>,

    #[serde(default)]
    pub default_out: Vec<String>,

    #[serde(rename = "out", default)]
    pub outputs: HashMap<String, AdapterConfig>,

    #[serde(default)]
    pub mappings: Vec<IndexMapping>,
}

/// One adapter instance: a driver id plus driver-specific options, parsed
/// further by the adapter it names.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    pub driver: String,

    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-reference checks that must fail at startup rather than when an
    /// index first sees traffic.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for mapping in &self.mappings {
            if !seen.insert(mapping.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate index name: {}",
                    mapping.name
                )));
            }

            let source = mapping.source.as_ref().or(self.default_in.as_ref());
            match source {
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "index {} has no source adapter and no default_in is set",
                        mapping.name
                    )))
                }
                Some(name) if !self.inputs.contains_key(name) => {
                    return Err(ConfigError::Invalid(format!(
                        "index {} references unknown source adapter: {}",
                        mapping.name, name
                    )))
                }
                _ => {}
            }

            let targets = mapping.targets.as_ref().unwrap_or(&self.default_out);
            if targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "index {} has no target adapters and no default_out is set",
                    mapping.name
                )));
            }
            for name in targets {
                if !self.outputs.contains_key(name) {
                    return Err(ConfigError::Invalid(format!(
                        "index {} references unknown target adapter: {}",
                        mapping.name, name
                    )));
                }
            }

            if mapping.chunk_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "index {} has a zero chunk_size",
                    mapping.name
                )));
            }
        }
        Ok(())
    }

    /// Resolved source adapter instance name for a mapping.
    pub fn source_for<'a>(&'a self, mapping: &'a IndexMapping) -> &'a str {
        mapping
            .source
            .as_deref()
            .or(self.default_in.as_deref())
            .expect("validated at load time")
    }

    /// Resolved target adapter instance names for a mapping.
    pub fn targets_for<'a>(&'a self, mapping: &'a IndexMapping) -> &'a [String] {
        mapping.targets.as_deref().unwrap_or(&self.default_out)
    }
}
