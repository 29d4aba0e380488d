use crate::domain::{config::LinkConfig, error::{LinkError, LinkResult}};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = ".sensorlink";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
///
/// The global file is read first and the project file, if any, is laid
/// over it key by key.
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> LinkResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_project_config_path(&dir));

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager over explicit file locations
    pub fn with_paths(global: impl Into<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            global_config_path: global.into(),
            project_config_path: project,
        }
    }

    /// Load configuration from files
    pub fn load_config(&self) -> LinkResult<LinkConfig> {
        let mut merged = toml::Table::new();

        if self.global_config_path.exists() {
            debug!("Loading {}", self.global_config_path.display());
            merge_tables(&mut merged, read_table(&self.global_config_path)?);
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                debug!("Loading {}", project_path.display());
                merge_tables(&mut merged, read_table(project_path)?);
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e| LinkError::Config {
                message: format!("Invalid configuration: {}", e),
            })
    }

    /// Save configuration to the project file, or the global one when
    /// there is no project
    pub fn save_config(&self, config: &LinkConfig) -> LinkResult<()> {
        let path = self
            .project_config_path
            .as_ref()
            .unwrap_or(&self.global_config_path);
        self.save_config_to_path(path, config)
    }

    /// Get global configuration path
    fn get_global_config_path() -> LinkResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| LinkError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("sensorlink").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        let mut path = start;

        loop {
            let config_path = path.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> LinkResult<LinkConfig> {
        let content = fs::read_to_string(path).map_err(|e| LinkError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| LinkError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &LinkConfig) -> LinkResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LinkError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| LinkError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| LinkError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create default project configuration
    pub fn init_project_config(&self, path: &Path) -> LinkResult<PathBuf> {
        let config_file = path.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(LinkError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        let mut config = LinkConfig::default();
        config.storage.channel_store = Some(PathBuf::from(CONFIG_DIR).join("channels.toml"));
        config.storage.record_path = Some(PathBuf::from("readings.csv"));

        self.save_config_to_path(&config_file, &config)?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}

fn read_table(path: &Path) -> LinkResult<toml::Table> {
    let content = fs::read_to_string(path).map_err(|e| LinkError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })?;

    content.parse::<toml::Table>().map_err(|e| LinkError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

/// Overlay `overlay` onto `base`; nested tables merge, other values replace
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::FramingMode;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("missing.toml"), None);
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.serial.baud_rate, 9600);
    }

    #[test]
    fn test_project_overrides_global_per_key() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        let project = temp_dir.path().join("project.toml");
        fs::write(
            &global,
            "[global]\nlog_level = \"debug\"\n\n[serial]\nbaud_rate = 115200\n",
        )
        .unwrap();
        fs::write(&project, "[global]\nframing = \"line\"\n").unwrap();

        let config = ConfigManager::with_paths(global, Some(project)).load_config().unwrap();

        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.global.framing, FramingMode::Line);
        assert_eq!(config.serial.baud_rate, 115200);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        fs::write(&global, "[global\n").unwrap();

        let result = ConfigManager::with_paths(global, None).load_config();
        assert!(matches!(result, Err(LinkError::Config { .. })));
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(config_file, temp_dir.path().join(".sensorlink").join("config.toml"));

        let config = manager.load_config_from_path(&config_file).unwrap();
        assert!(config.storage.record_path.is_some());

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_project_file_found_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(temp_dir.path().join(CONFIG_DIR)).unwrap();
        fs::write(temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE), "").unwrap();

        let found = ConfigManager::find_project_config_path(&nested).unwrap();
        assert_eq!(found, temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE));
    }
}
