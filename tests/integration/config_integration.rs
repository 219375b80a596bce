//! Integration tests for Configuration System

use super::test_utils::InMemoryDistributedCache;
use context_resolution::cache::DistributedCacheTier;
use context_resolution::{
    CancellationToken, ConfigLoader, ContextResolver, ErrorKind, ResolutionConfig,
    SourceRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn write_workspace_config(root: &std::path::Path, contents: &str) {
    let config_dir = root.join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_layers_override_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let global_file = temp_dir.path().join("global.toml");
    std::fs::write(
        &global_file,
        r#"
[cache]
local_size_limit = 4096
local_sliding_expiration_secs = 10

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let workspace = temp_dir.path().join("workspace");
    write_workspace_config(
        &workspace,
        r#"
[cache]
use_distributed_cache = true
local_size_limit = 1024
"#,
    );

    let env = HashMap::from([(
        "CONTEXT_RESOLUTION__CACHE__LOCAL_SLIDING_EXPIRATION_SECS".to_string(),
        "45".to_string(),
    )]);

    let config = ConfigLoader::load_layers(&workspace, Some(&global_file), Some(env)).unwrap();

    assert!(config.cache.use_local_cache);
    assert!(config.cache.use_distributed_cache);
    assert_eq!(config.cache.local_size_limit, Some(1024));
    assert_eq!(config.cache.local_sliding_expiration_secs, Some(45));
    assert_eq!(config.cache.distributed_sliding_expiration_secs, Some(900));
    assert_eq!(config.logging.level, "debug");
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_files_fall_back_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_layers(
        temp_dir.path(),
        Some(&temp_dir.path().join("absent.toml")),
        Some(HashMap::new()),
    )
    .unwrap();

    assert_eq!(config, ResolutionConfig::default());
}

#[test]
fn test_load_from_file_reports_invalid_values() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_file,
        r#"
[cache]
local_sliding_expiration_secs = 0

[logging]
format = "yaml"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn test_resolver_from_config() {
    let sources = Arc::new(SourceRegistry::new());

    let resolver = ContextResolver::from_config(sources.clone(), &ResolutionConfig::default(), None)
        .unwrap();
    let value = resolver
        .resolve_named("config-lonely", None, false, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value, serde_json::json!({}));

    let mut config = ResolutionConfig::default();
    config.cache.local_size_limit = Some(0);
    let err = ContextResolver::from_config(sources, &config, None).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_resolver_from_config_requires_distributed_tier() {
    let sources = Arc::new(SourceRegistry::new());
    let mut config = ResolutionConfig::default();
    config.cache.use_distributed_cache = true;

    let err = ContextResolver::from_config(sources.clone(), &config, None)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Config);

    let distributed: Arc<dyn DistributedCacheTier> = Arc::new(InMemoryDistributedCache::default());
    assert!(ContextResolver::from_config(sources, &config, Some(distributed)).is_ok());
}
