use assert_matches::assert_matches;
use secrecy::ExposeSecret;

use dataset_harvester::config::{Config, ConfigLoader, ConfigOverrides, RemapRule};
use dataset_harvester::error::HarvestError;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn full_config_resolves() {
    let config = parse(
        r#"{
            "schema_version": 1,
            "base_url": "http://localhost:8080/api/dataValueSets",
            "org_unit": "ou1",
            "start_date": "2020-01-01",
            "end_date": "2020-12-31",
            "username": "harvest",
            "password": "secret",
            "timeout_secs": 30,
            "chunk_size": 4096,
            "part_threshold_bytes": 1000,
            "output_root": "out",
            "datasets_file": "ids.txt",
            "error_log": "failed.log",
            "reset_keep": [".gitignore", "README"],
            "export_json": true,
            "remap": { "sentinel": "OLD", "replacement": "NEW" }
        }"#,
    );

    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(resolved.endpoint.base_url, "http://localhost:8080/api/dataValueSets");
    assert_eq!(resolved.endpoint.org_unit, "ou1");
    assert_eq!(resolved.endpoint.start_date.to_string(), "2020-01-01");
    assert_eq!(resolved.chunk_size, 4096);
    assert_eq!(resolved.part_threshold, 1000);
    assert_eq!(resolved.output_root, "out");
    assert_eq!(resolved.error_log, "failed.log");
    assert_eq!(resolved.reset_keep, vec![".gitignore", "README"]);
    assert!(resolved.export_json);
    assert_eq!(
        resolved.remap,
        RemapRule {
            columns: vec![
                "categoryoptioncombo".to_string(),
                "attributeoptioncombo".to_string()
            ],
            sentinel: "OLD".to_string(),
            replacement: "NEW".to_string(),
        }
    );
    let credentials = resolved.credentials().unwrap();
    assert_eq!(credentials.username, "harvest");
    assert_eq!(credentials.password.expose_secret(), "secret");
}

#[test]
fn password_is_redacted_in_debug_output() {
    let config = parse(r#"{ "username": "harvest", "password": "hunter2" }"#);
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert!(!format!("{resolved:?}").contains("hunter2"));
}

#[test]
fn missing_credentials_are_reported() {
    let resolved = ConfigLoader::resolve_config(parse(r#"{ "username": "harvest" }"#)).unwrap();
    assert_matches!(resolved.credentials(), Err(HarvestError::MissingCredentials));
}

#[test]
fn reversed_date_range_is_rejected() {
    let config = parse(r#"{ "start_date": "2023-01-01", "end_date": "2022-01-01" }"#);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HarvestError::InvalidConfig(_))
    );
}

#[test]
fn non_http_base_url_is_rejected() {
    let config = parse(r#"{ "base_url": "ftp://example.org/data" }"#);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(HarvestError::InvalidConfig(_))
    );
}

#[test]
fn zero_sizes_are_rejected() {
    assert_matches!(
        ConfigLoader::resolve_config(parse(r#"{ "chunk_size": 0 }"#)),
        Err(HarvestError::InvalidConfig(_))
    );
    assert_matches!(
        ConfigLoader::resolve_config(parse(r#"{ "part_threshold_bytes": 0 }"#)),
        Err(HarvestError::InvalidConfig(_))
    );

    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_matches!(
        resolved.with_overrides(ConfigOverrides {
            part_threshold: Some(0),
            ..ConfigOverrides::default()
        }),
        Err(HarvestError::InvalidConfig(_))
    );
}

#[test]
fn remap_rule_needs_two_distinct_columns() {
    let duplicate = parse(r#"{ "remap": { "columns": ["a", "a"] } }"#);
    assert_matches!(
        ConfigLoader::resolve_config(duplicate),
        Err(HarvestError::InvalidConfig(_))
    );

    let single = parse(r#"{ "remap": { "columns": ["a"] } }"#);
    assert_matches!(
        ConfigLoader::resolve_config(single),
        Err(HarvestError::InvalidConfig(_))
    );

    let empty_sentinel = parse(r#"{ "remap": { "sentinel": "" } }"#);
    assert_matches!(
        ConfigLoader::resolve_config(empty_sentinel),
        Err(HarvestError::InvalidConfig(_))
    );
}

#[test]
fn unreadable_config_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(HarvestError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("harvester.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(HarvestError::ConfigParse(_))
    );
}
