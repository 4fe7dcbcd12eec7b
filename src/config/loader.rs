// Configuration file loading and creation

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::types::Config;
use super::ConfigError;

/// Get the path to the configuration file
pub fn get_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("peerworld");
    path.push("config.toml");
    path
}

/// Load configuration from `path` (or the default location)
///
/// A missing file at the default location is created with defaults. A file
/// that fails to parse falls back to defaults with a warning; an explicitly
/// requested file that is missing or unreadable is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let explicit = path.is_some();
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    if !config_path.exists() {
        if explicit {
            return Err(ConfigError::Io {
                path: config_path,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if let Err(e) = create_default_config(&config_path) {
            warn!("Could not write default config: {}", e);
        }
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    let config = match parse_config(&contents, &config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using default configuration", e);
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Create a default configuration file with helpful comments
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_error)?;
    }

    let toml_string = toml::to_string_pretty(&Config::default())?;
    let commented_toml = format!(
        "# peerworld configuration file\n\
         # Restart host/join processes for changes to take effect\n\
         #\n\
         # [map] path: optional ASCII map ('#' blocked, '.' open)\n\
         # [faults]: host-side snapshot drop/delay for rehearsing bad networks\n\n\
         {}",
        toml_string
    );

    fs::write(path, commented_toml).map_err(io_error)?;
    info!("Created default config file at: {}", path.display());
    Ok(())
}
