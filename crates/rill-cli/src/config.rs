//! Configuration file support.

use rill_core::PlannerConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure.
///
/// ```toml
/// [defaults]
/// verbose = false
/// format = "json"
///
/// [planner]
/// side_input_priority = -1
/// collector_local_parallelism = 1
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
    /// Settings handed to the planner.
    pub planner: PlannerConfig,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Enable quiet output by default.
    pub quiet: bool,
    /// Output format of `rill plan` when `--format` is not given.
    pub format: Option<OutputFormat>,
}

/// How `rill plan` renders a DAG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl Config {
    /// Load config from the default location (~/.config/rill/config.toml).
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path. Missing or unreadable files fall
    /// back to defaults with a warning.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rill").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from_path(Some(PathBuf::from("/nonexistent/rill.toml")));
        assert!(!config.defaults.verbose);
        assert_eq!(config.planner, PlannerConfig::default());

        let config = Config::load_from_path(None);
        assert!(config.defaults.format.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config: Config = toml::from_str(
            r#"
[defaults]
quiet = true
format = "yaml"

[planner]
collector_local_parallelism = 4
"#,
        )
        .unwrap();

        assert!(config.defaults.quiet);
        assert_eq!(config.defaults.format, Some(OutputFormat::Yaml));
        assert_eq!(config.planner.collector_local_parallelism, 4);
        assert_eq!(config.planner.side_input_priority, -1);
    }
}
