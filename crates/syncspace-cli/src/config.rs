use miette::miette;
use serde::Deserialize;
use std::path::Path;
use std::{env, fs};
use syncspace_canvas::UndoConfig;
use syncspace_ideas::RateLimitConfig;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "syncspace.toml";

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub undo: UndoConfig,
    pub ideas: RateLimitConfig,
}

impl Config {
    pub fn load(config_file: &Path) -> miette::Result<Config> {
        let config_string = fs::read_to_string(config_file).map_err(|e| {
            miette!("error reading config file {}: {}", config_file.display(), e)
        })?;
        Self::parse(&config_string)
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn resolve(path: Option<&Path>) -> miette::Result<Config> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => {
                tracing::debug!("no config file, using defaults");
                Ok(Config::default())
            }
        }
    }

    fn parse(config_string: &str) -> miette::Result<Config> {
        let mut config_string = config_string.to_string();
        // substitute environment variables in config file
        for (k, v) in env::vars() {
            config_string = config_string.replace(&format!("${}", k), &v);
        }

        toml::from_str(&config_string).map_err(|e| miette!("error parsing config file {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::parse("[undo]\ncapture_timeout_ms = 250\n").unwrap();
        assert_eq!(config.undo.capture_timeout_ms, 250);
        assert_eq!(config.undo.max_steps, 100);
        assert_eq!(config.ideas, RateLimitConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
[undo]
capture_timeout_ms = 500
max_steps = 20

[ideas]
max_requests_per_window = 2
window_secs = 30
max_requests_per_client_per_day = 10
max_unique_clients_per_day = 8
"#,
        )
        .unwrap();
        assert_eq!(config.undo.max_steps, 20);
        assert_eq!(config.ideas.window_secs, 30);
        assert_eq!(config.ideas.max_unique_clients_per_day, 8);
    }

    #[test]
    fn test_env_substitution() {
        // SAFETY: no other test reads or writes this variable
        unsafe { env::set_var("SYNCSPACE_TEST_MAX_STEPS", "7") };
        let config = Config::parse("[undo]\nmax_steps = $SYNCSPACE_TEST_MAX_STEPS\n").unwrap();
        assert_eq!(config.undo.max_steps, 7);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(Config::parse("[undo]\nmax_steps = \"many\"\n").is_err());
    }
}
