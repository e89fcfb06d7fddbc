use super::*;
use serial_test::serial;
use tempfile::tempdir;

#[test]
fn test_defaults_when_no_files_exist() {
    let dir = tempdir().unwrap();
    let project_path = paths::project_config_path(dir.path());
    let config = DispatchConfig::load_with_paths(None, &project_path).unwrap();
    assert_eq!(config, DispatchConfig::default());
    assert_eq!(config.tiers.small.hourly_quota, 60);
    assert_eq!(config.tiers.large.concurrency, 2);
}

#[test]
fn test_partial_tier_override_keeps_other_fields() {
    let config = DispatchConfig::from_toml_str(
        r#"
[tiers.small]
hourly_quota = 10
"#,
    )
    .unwrap();
    assert_eq!(config.tiers.small.hourly_quota, 10);
    assert_eq!(config.tiers.small.daily_quota, 1000);
    assert_eq!(config.tiers.small.endpoint, "vnptai-hackathon-small");
    assert_eq!(config.tiers.large, default_large_tier());
}

#[test]
fn test_project_overrides_user() {
    let dir = tempdir().unwrap();
    let user_path = dir.path().join("user.toml");
    std::fs::write(
        &user_path,
        r#"
[tiers.large]
hourly_quota = 5
concurrency = 8

[retry]
max_attempts = 7
"#,
    )
    .unwrap();

    let project_path = paths::project_config_path(dir.path());
    std::fs::create_dir_all(project_path.parent().unwrap()).unwrap();
    std::fs::write(
        &project_path,
        r#"
[tiers.large]
concurrency = 3
"#,
    )
    .unwrap();

    let config = DispatchConfig::load_with_paths(Some(&user_path), &project_path).unwrap();
    assert_eq!(config.tiers.large.hourly_quota, 5, "user value survives merge");
    assert_eq!(config.tiers.large.concurrency, 3, "project value wins");
    assert_eq!(config.retry.max_attempts, 7);
}

#[test]
fn test_missing_user_path_is_ignored() {
    let dir = tempdir().unwrap();
    let user_path = dir.path().join("does-not-exist.toml");
    let project_path = paths::project_config_path(dir.path());
    let config = DispatchConfig::load_with_paths(Some(&user_path), &project_path).unwrap();
    assert_eq!(config, DispatchConfig::default());
}

#[test]
fn test_parse_error_names_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[tiers.small\nhourly_quota = ").unwrap();
    let err = DispatchConfig::load_file(&path).unwrap_err();
    assert!(
        format!("{err:#}").contains("broken.toml"),
        "error should name the file: {err:#}"
    );
}

#[test]
fn test_newer_schema_version_rejected() {
    let err = DispatchConfig::from_toml_str("schema_version = 99").unwrap_err();
    assert!(err.to_string().contains("newer than this binary supports"));
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = tempdir().unwrap();
    let mut config = DispatchConfig::default();
    config.set_concurrency(Tier::Small, 9);
    config.cache.version = "exp-2".to_string();
    config.api.seed = None;
    config.save(dir.path()).unwrap();

    let project_path = paths::project_config_path(dir.path());
    let loaded = DispatchConfig::load_with_paths(None, &project_path).unwrap();
    assert_eq!(loaded.tiers.small.concurrency, 9);
    assert_eq!(loaded.cache.version, "exp-2");
    assert_eq!(loaded.api.seed, None);
}

#[test]
fn test_duration_helpers() {
    let config = DispatchConfig::default();
    assert_eq!(config.retry.base_delay(), Duration::from_secs(2));
    assert_eq!(config.wait.recheck_interval(), Duration::from_secs(300));
    assert_eq!(config.wait.min_cooldown(), Duration::from_secs(30));
    assert_eq!(config.api.timeout(), Duration::from_secs(300));
}

#[test]
fn test_tiers_concurrency_per_tier() {
    let config = DispatchConfig::default();
    let concurrency = config.tiers.concurrency();
    assert_eq!(concurrency[Tier::Small], 4);
    assert_eq!(concurrency[Tier::Large], 2);
}

#[test]
#[serial]
fn test_env_overrides_cache_dir_and_keys() {
    // SAFETY: serialized with other env-touching tests via #[serial].
    unsafe {
        std::env::set_var(ENV_CACHE_DIR, "/tmp/qad-cache-test");
        std::env::set_var(ENV_KEYS_FILE, "/tmp/keys.json");
    }
    let mut config = DispatchConfig::default();
    config.apply_env_overrides();
    unsafe {
        std::env::remove_var(ENV_CACHE_DIR);
        std::env::remove_var(ENV_KEYS_FILE);
    }
    assert_eq!(config.cache.dir, PathBuf::from("/tmp/qad-cache-test"));
    assert_eq!(config.api.keys_file, PathBuf::from("/tmp/keys.json"));
}

#[test]
#[serial]
fn test_empty_env_override_ignored() {
    // SAFETY: serialized with other env-touching tests via #[serial].
    unsafe { std::env::set_var(ENV_CACHE_DIR, "") };
    let mut config = DispatchConfig::default();
    config.apply_env_overrides();
    unsafe { std::env::remove_var(ENV_CACHE_DIR) };
    assert_eq!(config.cache.dir, PathBuf::from("./cache"));
}
