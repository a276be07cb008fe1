//! TOML configuration for the aspects engine

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::hooks::{AspectError, HookResult};
use crate::runtime::TEARDOWN_MEMBER;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AspectsConfig {
    /// Engine-wide configuration
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Members that can never be hooked
    #[serde(default = "default_deny_list")]
    pub deny_list: Vec<String>,

    /// Member run at object teardown; may only be hooked `before`
    #[serde(default = "default_teardown_member")]
    pub teardown_member: String,

    /// Keep per-handler execution statistics
    #[serde(default = "default_true")]
    pub record_stats: bool,
}

/// Built-in handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltInConfig {
    /// Built-in handler name
    pub handler_name: String,

    /// Handler-specific configuration
    #[serde(flatten)]
    pub config: HashMap<String, serde_json::Value>,
}

impl BuiltInConfig {
    pub fn new(handler_name: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            config: HashMap::new(),
        }
    }

    /// Add a configuration entry
    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

impl AspectsConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Save configuration to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> HookResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from the platform config file, or defaults when it is absent
    pub fn load_default() -> HookResult<Self> {
        let path = crate::platform_dirs::config_file()
            .map_err(|e| AspectError::invalid_config(e.to_string()))?;
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading aspects configuration");
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> HookResult<()> {
        self.engine.validate()
    }
}

impl EngineConfig {
    /// Validate engine settings
    pub fn validate(&self) -> HookResult<()> {
        if self.teardown_member.is_empty() {
            return Err(AspectError::invalid_config("teardown_member cannot be empty"));
        }

        let mut seen = HashSet::new();
        for member in &self.deny_list {
            if member.is_empty() {
                return Err(AspectError::invalid_config("deny_list contains an empty member name"));
            }
            if !seen.insert(member) {
                return Err(AspectError::invalid_config(format!(
                    "Duplicate deny_list entry: {}",
                    member
                )));
            }
        }

        if self.deny_list.contains(&self.teardown_member) {
            return Err(AspectError::invalid_config(format!(
                "teardown member '{}' is also deny-listed",
                self.teardown_member
            )));
        }

        Ok(())
    }

    pub fn is_denied(&self, member: &str) -> bool {
        self.deny_list.iter().any(|m| m == member)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deny_list: default_deny_list(),
            teardown_member: default_teardown_member(),
            record_stats: true,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_deny_list() -> Vec<String> {
    ["retain", "release", "autorelease", "forward_invocation"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_teardown_member() -> String {
    TEARDOWN_MEMBER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_serialization() {
        let config = AspectsConfig::new();
        let toml = config.to_toml().unwrap();
        let parsed = AspectsConfig::from_toml(&toml).unwrap();

        assert_eq!(parsed.engine.deny_list, config.engine.deny_list);
        assert_eq!(parsed.engine.teardown_member, "dealloc");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let parsed = AspectsConfig::from_toml("").unwrap();
        assert!(parsed.engine.is_denied("retain"));
        assert!(parsed.engine.record_stats);

        let parsed = AspectsConfig::from_toml("[engine]\nrecord_stats = false\n").unwrap();
        assert!(!parsed.engine.record_stats);
        assert!(parsed.engine.is_denied("forward_invocation"));
    }

    #[test]
    fn test_validation() {
        let mut config = AspectsConfig::new();
        assert!(config.validate().is_ok());

        config.engine.deny_list.push("retain".to_string());
        assert!(config.validate().is_err());

        let mut config = AspectsConfig::new();
        config.engine.deny_list.push("dealloc".to_string());
        assert!(config.validate().is_err());

        let mut config = AspectsConfig::new();
        config.engine.teardown_member.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aspects.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[engine]\ndeny_list = [\"reset\"]\nteardown_member = \"finalize\"").unwrap();

        let config = AspectsConfig::load(&path).unwrap();
        assert_eq!(config.engine.deny_list, vec!["reset"]);
        assert_eq!(config.engine.teardown_member, "finalize");

        assert!(matches!(
            AspectsConfig::load(dir.path().join("missing.toml")),
            Err(AspectError::IoError(_))
        ));
    }

    #[test]
    fn test_builtin_config_flatten() {
        let parsed: BuiltInConfig = toml::from_str("handler_name = \"logging\"\nlevel = \"debug\"\n").unwrap();
        assert_eq!(parsed.handler_name, "logging");
        assert_eq!(parsed.get_str("level"), Some("debug"));
    }
}
