use schema_form::config::EngineSettings;
use schema_form::Form;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_settings_from_root() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    let settings_toml = r#"
[resolver]
max_depth = 8

[validation]
locale = "fr"

[one_of]
preserve_properties = ["notes"]
"#;
    fs::write(root.join("schema-form.toml"), settings_toml)?;

    let settings = EngineSettings::from_root(root.to_str().unwrap())?;

    assert_eq!(settings.resolver.max_depth, 8);
    assert_eq!(settings.validation.locale.as_deref(), Some("fr"));
    assert_eq!(settings.one_of.preserve_properties, vec!["notes".to_string()]);
    // untouched sections keep their defaults
    assert_eq!(settings.expressions.max_operations, 10_000);
    assert_eq!(settings.cascade.max_flush_passes, 16);

    Ok(())
}

#[test]
fn test_missing_settings_file_uses_defaults() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;

    let settings = EngineSettings::from_root(temp_dir.path().to_str().unwrap())?;

    assert_eq!(settings.resolver.max_depth, 20);
    assert!(settings.validation.enabled);
    Ok(())
}

#[test]
fn test_yaml_settings_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("engine.yaml");
    fs::write(
        &path,
        r#"
expressions:
  max_operations: 500
logging:
  level: debug
"#,
    )?;

    let settings = EngineSettings::from_file(&path)?;

    assert_eq!(settings.expressions.max_operations, 500);
    assert_eq!(settings.logging.level, "debug");
    Ok(())
}

#[test]
fn test_invalid_settings_are_rejected() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("engine.json");
    fs::write(&path, r#"{ "resolver": { "max_depth": 0 }, "logging": { "level": "chatty" } }"#)?;

    let err = EngineSettings::from_file(&path).unwrap_err().to_string();

    assert!(err.contains("resolver.max_depth"));
    assert!(err.contains("logging.level"));
    Ok(())
}

#[test]
fn test_settings_file_must_exist() {
    assert!(EngineSettings::from_file("/nonexistent/engine.toml").is_err());
}

#[test]
fn test_reference_dirs_feed_the_form() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let refs = temp_dir.path().join("schemas");
    fs::create_dir_all(&refs)?;
    fs::write(
        refs.join("address.json"),
        r#"{ "type": "object", "properties": { "city": { "type": "string", "minLength": 2 } }, "required": ["city"] }"#,
    )?;

    let mut settings = EngineSettings::default();
    settings.resolver.reference_dirs = vec![refs.to_string_lossy().into_owned()];
    let schema = json!({
        "type": "object",
        "properties": { "home": { "$ref": "address.json" } }
    });

    let mut form = Form::from_settings(schema, None, settings)?;
    assert!(!form.is_valid());

    form.set_value("home.city", json!("Oslo"))?;
    assert!(form.is_valid());
    Ok(())
}
