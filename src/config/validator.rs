use std::collections::HashSet;
use thiserror::Error;

use crate::config::{EngineSettings, ExpressionSettings, ResolverSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub struct SettingsValidator;

impl SettingsValidator {
    /// Check every section; all problems are reported together
    pub fn validate(settings: &EngineSettings) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_resolver(&settings.resolver) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_expressions(&settings.expressions) {
            errors.extend(e);
        }

        if settings.cascade.max_flush_passes == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "cascade.max_flush_passes".to_string(),
                reason: "At least one flush pass is required".to_string(),
            });
        }

        if let Some(locale) = &settings.validation.locale {
            if locale.trim().is_empty() {
                errors.push(ConfigError::InvalidValue {
                    field: "validation.locale".to_string(),
                    reason: "Locale must not be blank".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (idx, name) in settings.one_of.preserve_properties.iter().enumerate() {
            if name.is_empty() {
                errors.push(ConfigError::MissingField(format!("one_of.preserve_properties[{}]", idx)));
            } else if !seen.insert(name) {
                errors.push(ConfigError::Duplicate(format!(
                    "Preserved property '{}' is listed more than once",
                    name
                )));
            }
        }

        let level = settings.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Expected one of {}", LOG_LEVELS.join(", ")),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_resolver(resolver: &ResolverSettings) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if resolver.max_depth == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "resolver.max_depth".to_string(),
                reason: "Depth must be greater than 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (idx, dir) in resolver.reference_dirs.iter().enumerate() {
            if dir.is_empty() {
                errors.push(ConfigError::MissingField(format!("resolver.reference_dirs[{}]", idx)));
            } else if !seen.insert(dir) {
                errors.push(ConfigError::Duplicate(format!("Reference directory '{}' appears twice", dir)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_expressions(expressions: &ExpressionSettings) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if expressions.max_operations == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "expressions.max_operations".to_string(),
                reason: "Operation budget must be greater than 0".to_string(),
            });
        }

        if expressions.max_expr_depth == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "expressions.max_expr_depth".to_string(),
                reason: "Expression depth must be greater than 0".to_string(),
            });
        }

        if expressions.max_string_size == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "expressions.max_string_size".to_string(),
                reason: "String size must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(SettingsValidator::validate(&EngineSettings::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut settings = EngineSettings::default();
        settings.resolver.max_depth = 0;
        settings.expressions.max_operations = 0;
        settings.cascade.max_flush_passes = 0;
        settings.logging.level = "loud".to_string();

        let errors = SettingsValidator::validate(&settings).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("resolver.max_depth")));
    }

    #[test]
    fn test_duplicate_preserved_property() {
        let mut settings = EngineSettings::default();
        settings.one_of.preserve_properties = vec!["note".to_string(), "note".to_string()];

        let errors = SettingsValidator::validate(&settings).unwrap_err();
        assert!(matches!(errors[0], ConfigError::Duplicate(_)));
    }
}
