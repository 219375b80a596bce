//! Configuration loader: assembles the layered sources into a [`ResolutionConfig`].

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::ResolutionConfig;
use config::{ConfigError, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace files, environment.
    pub fn load(workspace_root: &Path) -> Result<ResolutionConfig, ConfigError> {
        Self::load_layers(workspace_root, Self::global_config_path().as_deref(), None)
    }

    /// Load configuration with an explicit global file and environment.
    ///
    /// `env` replaces the process environment when given.
    pub fn load_layers(
        workspace_root: &Path,
        global_file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<ResolutionConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder, global_file)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder, env)?;
        builder.build()?.try_deserialize()
    }

    /// Load configuration from a single file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<ResolutionConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Location of the global config file.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Built-in defaults.
    pub fn default() -> ResolutionConfig {
        ResolutionConfig::default()
    }
}
