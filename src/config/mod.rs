//! llama-swap configuration document
//!
//! In-memory tree of named model entries, rendered to and parsed from the
//! YAML layout llama-swap reads:
//!
//! ```yaml
//! models:
//!   qwen:
//!     cmd: /app/llama-server -m /models/qwen.gguf ... --port ${PORT} --host 0.0.0.0
//!     aliases: [gpt-4o-mini]
//! ```

pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command;
use crate::types::launch::{ModelLaunchSpec, ValidationError};

/// Template written when no model is configured, so the file stays editable.
const EMPTY_TEMPLATE: &str = "\
# llama-swap configuration
# No models configured yet. Add entries under `models`, for example:
#
# models:
#   my-model:
#     cmd: /app/llama-server -m /models/my-model.gguf --port ${PORT} --host 0.0.0.0
#     aliases:
#       - my-alias
models:
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration YAML: {0}")]
    Parse(serde_yaml::Error),
    #[error("Failed to render configuration: {0}")]
    Render(serde_yaml::Error),
}

/// One model entry as stored in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    /// Keys llama-swap understands that this dashboard does not edit (ttl, env, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ModelEntry {
    pub fn from_spec(spec: &ModelLaunchSpec) -> Self {
        Self {
            cmd: command::encode(spec),
            aliases: spec.aliases.clone().filter(|aliases| !aliases.is_empty()),
            extra: BTreeMap::new(),
        }
    }

    /// Decode the entry back into editable launch parameters.
    pub fn to_spec(&self) -> ModelLaunchSpec {
        ModelLaunchSpec {
            aliases: self.aliases.clone().filter(|aliases| !aliases.is_empty()),
            ..command::decode(&self.cmd)
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    models: Option<BTreeMap<String, ModelEntry>>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Named model entries plus any top-level keys carried through untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    models: BTreeMap<String, ModelEntry>,
    extra: BTreeMap<String, serde_yaml::Value>,
}

impl ConfigDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry under `name`.
    ///
    /// Returns true when an existing entry was replaced. Keys of the replaced
    /// entry that are not edited here (`ttl`, `env`, ...) carry over.
    pub fn add_entry(&mut self, name: &str, spec: &ModelLaunchSpec) -> Result<bool, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Missing("model name"));
        }
        spec.validate()?;

        let mut entry = ModelEntry::from_spec(spec);
        let previous = self.models.remove(name);
        if let Some(previous) = &previous {
            entry.extra = previous.extra.clone();
        }
        self.models.insert(name.to_string(), entry);
        Ok(previous.is_some())
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<ModelEntry> {
        self.models.remove(name)
    }

    /// Drop every model entry. Top-level settings such as `healthCheckTimeout` stay.
    pub fn clear(&mut self) {
        self.models.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    pub fn spec_for(&self, name: &str) -> Option<ModelLaunchSpec> {
        self.models.get(name).map(ModelEntry::to_spec)
    }

    /// Entry names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ModelEntry)> {
        self.models.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Render the document as YAML. Output is deterministic: entries are sorted by name.
    pub fn render(&self) -> Result<String, ConfigError> {
        if self.models.is_empty() {
            let mut out = String::new();
            if !self.extra.is_empty() {
                out.push_str(&serde_yaml::to_string(&self.extra).map_err(ConfigError::Render)?);
            }
            out.push_str(EMPTY_TEMPLATE);
            return Ok(out);
        }

        let raw = RawDocument {
            models: Some(self.models.clone()),
            extra: self.extra.clone(),
        };
        serde_yaml::to_string(&raw).map_err(ConfigError::Render)
    }

    /// Parse a YAML document. Blank input and a null `models` key both mean "no models".
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: Option<RawDocument> = serde_yaml::from_str(text).map_err(ConfigError::Parse)?;
        let raw = raw.unwrap_or_default();
        Ok(Self {
            models: raw.models.unwrap_or_default(),
            extra: raw.extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(path: &str) -> ModelLaunchSpec {
        ModelLaunchSpec::for_file(path)
    }

    #[test]
    fn test_add_entry_validates() {
        let mut doc = ConfigDocument::new();
        assert_eq!(
            doc.add_entry("", &spec("/m/a.gguf")),
            Err(ValidationError::Missing("model name"))
        );
        assert_eq!(
            doc.add_entry("a", &spec("")),
            Err(ValidationError::Missing("file path"))
        );
        assert!(doc.is_empty());
    }

    #[test]
    fn test_add_entry_overwrites() {
        let mut doc = ConfigDocument::new();
        assert_eq!(doc.add_entry("a", &spec("/m/a.gguf")), Ok(false));
        assert_eq!(doc.add_entry("a", &spec("/m/b.gguf")), Ok(true));
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.spec_for("a").unwrap().file_path, "/m/b.gguf");
    }

    #[test]
    fn test_add_then_remove_restores_render() {
        let mut doc = ConfigDocument::new();
        doc.add_entry("base", &spec("/m/base.gguf")).unwrap();
        let before = doc.render().unwrap();

        doc.add_entry("extra", &spec("/m/extra.gguf")).unwrap();
        assert_ne!(doc.render().unwrap(), before);
        assert!(doc.remove_entry("extra").is_some());
        assert_eq!(doc.render().unwrap(), before);
        assert!(doc.remove_entry("missing").is_none());
    }

    #[test]
    fn test_empty_document_renders_template() {
        let doc = ConfigDocument::new();
        let text = doc.render().unwrap();
        assert!(text.starts_with("# llama-swap configuration"));
        assert!(text.trim_end().ends_with("models:"));
        assert_eq!(ConfigDocument::parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_render_parse_preserves_entries_and_aliases() {
        let mut doc = ConfigDocument::new();
        let with_aliases = ModelLaunchSpec {
            aliases: Some(vec!["gpt-4o-mini".to_string(), "default".to_string()]),
            threads: Some(6),
            ..spec("/models/qwen.gguf")
        };
        doc.add_entry("qwen", &with_aliases).unwrap();
        doc.add_entry("llama", &spec("/models/llama.gguf")).unwrap();

        let text = doc.render().unwrap();
        assert!(text.find("llama:").unwrap() < text.find("qwen:").unwrap());

        let parsed = ConfigDocument::parse(&text).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.spec_for("qwen").unwrap(), with_aliases);
    }

    #[test]
    fn test_parse_keeps_unknown_keys() {
        let text = "\
healthCheckTimeout: 120
models:
  phi:
    cmd: /app/llama-server -m /models/phi.gguf --port ${PORT} --host 0.0.0.0
    ttl: 300
";
        let mut doc = ConfigDocument::parse(text).unwrap();
        assert_eq!(doc.get("phi").unwrap().extra.len(), 1);

        doc.clear();
        let rendered = doc.render().unwrap();
        assert!(rendered.contains("healthCheckTimeout: 120"));
        assert!(ConfigDocument::parse(&rendered).unwrap().is_empty());
    }

    #[test]
    fn test_overwrite_keeps_entry_keys() {
        let text = "\
models:
  phi:
    cmd: /app/llama-server -m /models/phi.gguf --port ${PORT} --host 0.0.0.0
    ttl: 300
";
        let mut doc = ConfigDocument::parse(text).unwrap();
        let edited = ModelLaunchSpec {
            context_size: 8192,
            ..doc.spec_for("phi").unwrap()
        };
        assert_eq!(doc.add_entry("phi", &edited), Ok(true));

        let rendered = doc.render().unwrap();
        assert!(rendered.contains("ttl: 300"));
        assert!(rendered.contains("-c 8192"));

        doc.add_entry("fresh", &spec("/models/fresh.gguf")).unwrap();
        assert!(doc.get("fresh").unwrap().extra.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ConfigDocument::parse("models: [unclosed").is_err());
        assert!(ConfigDocument::parse("models:\n  a: 12\n").is_err());
        assert!(ConfigDocument::parse("").unwrap().is_empty());
    }
}
