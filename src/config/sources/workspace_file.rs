//! Workspace config file source: config/config.toml, then config/{env}.toml

use crate::config::ENV_NAME_VAR;
use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_ENV_NAME: &str = "development";

/// Workspace files in precedence order; the environment-specific file is selected by
/// `CONTEXT_RESOLUTION_ENV`.
pub fn workspace_config_paths(workspace_root: &Path) -> [PathBuf; 2] {
    let env_name =
        std::env::var(ENV_NAME_VAR).unwrap_or_else(|_| DEFAULT_ENV_NAME.to_string());
    let config_dir = workspace_root.join("config");
    [
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ]
}

/// Add the workspace files that exist to the builder.
pub fn add_to_builder(
    mut builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    for path in workspace_config_paths(workspace_root) {
        if path.exists() {
            debug!(config_path = %path.display(), "Loading workspace configuration");
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
    }
    Ok(builder)
}
