use deep_research::{DatabaseProvider, ResearchConfig, ResearchConfigManager};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_shipped_config_is_valid() {
    let config = ResearchConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/research.toml"))
        .expect("research.toml should load");

    assert_eq!(config.default_model, "default");
    assert!(config.models.contains_key("local"));
    let (level, budget) = config.budget_level(Some("ultra")).unwrap();
    assert_eq!(level, "ULTRA");
    assert_eq!(budget.max_search_count, 8);
    assert!(matches!(
        DatabaseProvider::from_config(&config),
        DatabaseProvider::SQLite { .. }
    ));
}

#[test]
fn test_reload_picks_up_new_budget_tiers() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[budget]
default_level = "SMALL"

[budget.levels.SMALL]
max_conduct_count = 1
max_search_count = 1
max_concurrent_units = 1
"#
    )
    .unwrap();

    let manager = ResearchConfigManager::new(file.path()).unwrap();
    assert!(manager.config().budget_level(Some("LARGE")).is_none());

    let mut handle = file.reopen().unwrap();
    handle.set_len(0).unwrap();
    write!(
        handle,
        r#"
[budget]
default_level = "LARGE"

[budget.levels.LARGE]
max_conduct_count = 5
max_search_count = 5
max_concurrent_units = 2
"#
    )
    .unwrap();

    manager.reload().unwrap();
    let (level, budget) = manager.config().budget_level(None).unwrap();
    assert_eq!(level, "LARGE");
    assert_eq!(budget.max_conduct_count, 5);
}

#[test]
fn test_invalid_reload_keeps_previous_config() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[executor]\nmax_pool_size = 4").unwrap();
    let manager = ResearchConfigManager::new(file.path()).unwrap();

    let mut handle = file.reopen().unwrap();
    handle.set_len(0).unwrap();
    writeln!(handle, "[executor]\nmax_pool_size = 0").unwrap();

    assert!(manager.reload().is_err());
    assert_eq!(manager.config().executor.max_pool_size, 4);
}
