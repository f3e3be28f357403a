use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod validator;

pub use validator::{ConfigError, SettingsValidator};

/// Base name of the optional settings file (`schema-form.toml|yaml|json`)
pub const SETTINGS_FILE: &str = "schema-form";

/// Prefix of environment overrides: `SCHEMA_FORM__RESOLVER__MAX_DEPTH=8`
pub const ENV_PREFIX: &str = "SCHEMA_FORM";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub expressions: ExpressionSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub cascade: CascadeSettings,
    #[serde(default)]
    pub one_of: OneOfSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverSettings {
    /// Tree depth past which nodes are built as inert leaves
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Directories of schema documents loaded into the reference table
    #[serde(default)]
    pub reference_dirs: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            reference_dirs: Vec::new(),
        }
    }
}

/// Sandbox limits of the expression engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpressionSettings {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Picks the entry of a locale map in `errorMessages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            locale: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CascadeSettings {
    /// Bound on computed-property passes per flush
    #[serde(default = "default_max_flush_passes")]
    pub max_flush_passes: usize,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            max_flush_passes: default_max_flush_passes(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OneOfSettings {
    /// Property names kept when they belong only to a non-selected variant
    #[serde(default)]
    pub preserve_properties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_depth() -> usize {
    20
}

fn default_max_operations() -> u64 {
    10_000
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    4096
}

fn default_enabled() -> bool {
    true
}

fn default_max_flush_passes() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineSettings {
    /// Settings from `./schema-form.*` and the environment
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Settings from `<root>/schema-form.*` and the environment
    pub fn from_root(root: &str) -> Result<Self, anyhow::Error> {
        let base = Path::new(root).join(SETTINGS_FILE);
        let s = Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(environment())
            .build()?;

        let settings: EngineSettings = s.try_deserialize()?;
        settings.validated()
    }

    /// Settings from an explicit file; the format follows its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Settings file not found: {}", path.display());
        }
        let s = Config::builder()
            .add_source(File::from(path))
            .add_source(environment())
            .build()?;

        let settings: EngineSettings = s.try_deserialize()?;
        settings.validated()
    }

    fn validated(self) -> Result<Self, anyhow::Error> {
        SettingsValidator::validate(&self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("Configuration validation failed:\n{}", error_messages.join("\n"))
        })?;
        tracing::debug!(max_depth = self.resolver.max_depth, "Loaded engine settings");
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.resolver.max_depth, 20);
        assert!(settings.resolver.reference_dirs.is_empty());
        assert_eq!(settings.expressions.max_operations, 10_000);
        assert_eq!(settings.expressions.max_expr_depth, 64);
        assert!(settings.validation.enabled);
        assert_eq!(settings.cascade.max_flush_passes, 16);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let settings: EngineSettings = serde_json::from_str(r#"{ "resolver": { "max_depth": 5 } }"#).unwrap();
        assert_eq!(settings.resolver.max_depth, 5);
        assert_eq!(settings.expressions.max_string_size, 4096);
        assert!(settings.validation.locale.is_none());
    }
}
