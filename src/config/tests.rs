// Tests for detection configuration

use super::*;
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_embedded_defaults_parse() {
    let config = DetectionConfig::embedded().unwrap();
    assert_eq!(config.enabled, default_enabled());
    assert_eq!(config.strategies.len(), STRATEGY_NAMES.len());
}

#[test]
fn test_default_order() {
    let set = DetectionConfig::default().build().unwrap();
    assert_eq!(
        set.names(),
        vec![
            "dispatch_burst",
            "sequence_count",
            "target_cluster",
            "time_window",
            "frequency_threshold",
            "request_params",
            "name_similarity",
        ]
    );
}

#[test]
fn test_builtin_matches_embedded_order() {
    assert_eq!(DetectionConfig::builtin().enabled, DetectionConfig::embedded().unwrap().enabled);
}

#[test]
fn test_missing_enabled_list_means_all() {
    let config =
        DetectionConfig::from_toml_str("[strategies.time_window]\nwindow_ms = 10\n").unwrap();
    assert_eq!(config.enabled.len(), STRATEGY_NAMES.len());
    // integer TOML values are accepted for millisecond floats
    assert_eq!(config.params("time_window"), &json!({"window_ms": 10}));
}

#[test]
fn test_custom_order_and_subset() {
    let config = DetectionConfig::builtin().with_enabled(["name_similarity", "time_window"]);
    assert_eq!(config.build().unwrap().names(), vec!["name_similarity", "time_window"]);
}

#[test]
fn test_empty_enabled_list_builds_empty_set() {
    let set = DetectionConfig::builtin()
        .with_enabled(Vec::<String>::new())
        .build()
        .unwrap();
    assert!(set.is_empty());
}

#[test]
fn test_unknown_enabled_strategy() {
    let err = DetectionConfig::builtin()
        .with_enabled(["time_window", "tea_leaves"])
        .validate()
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownStrategy(ref name) if name == "tea_leaves"));
}

#[test]
fn test_unknown_parameter_table() {
    let err =
        DetectionConfig::from_toml_str("[strategies.time_windw]\nwindow_ms = 10\n").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownStrategy(ref name) if name == "time_windw"));
}

#[test]
fn test_duplicate_strategy() {
    let err = DetectionConfig::builtin()
        .with_enabled(["time_window", "time_window"])
        .validate()
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateStrategy(_)));
}

#[test]
fn test_invalid_parameters_surface_strategy_name() {
    let err = DetectionConfig::builtin()
        .with_params("frequency_threshold", json!({"threshold": 1}))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("frequency_threshold.threshold"));
}

#[test]
fn test_invalid_pattern() {
    let err = DetectionConfig::builtin()
        .with_params("name_similarity", json!({"pattern": "(unclosed"}))
        .validate()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidPattern { .. }));
}

#[test]
fn test_malformed_toml() {
    let err = DetectionConfig::from_toml_str("enabled = [").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn test_unknown_top_level_key() {
    assert!(DetectionConfig::from_toml_str("strategy_order = []").is_err());
}

#[test]
fn test_from_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
enabled = ["target_cluster"]

[strategies.target_cluster]
max_gap = 2
targets = ["pump"]
"#
    )
    .unwrap();

    let config = DetectionConfig::from_toml(file.path()).unwrap();
    assert_eq!(config.enabled, vec!["target_cluster"]);
    assert_eq!(config.params("target_cluster")["max_gap"], json!(2));
}

#[test]
fn test_from_toml_missing_file_has_context() {
    let err = DetectionConfig::from_toml("/nonexistent/racimo.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read strategy config"));
}
