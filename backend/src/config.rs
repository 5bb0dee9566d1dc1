use anyhow::{Context, Result};
use shared::{HostConfig, MigrationStrategy, ViewSection};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = "tree-host";
const CONFIG_FILE_NAME: &str = "config.toml";

/// `<config dir>/tree-host/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Reads the config at `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(HostConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read config {}", path.display()));
        }
    };

    let config = HostConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(migrate(config))
}

fn migrate(mut config: HostConfig) -> HostConfig {
    if !config.app.needs_migration() {
        return config;
    }
    match config.app.migration_strategy() {
        MigrationStrategy::None => config,
        MigrationStrategy::Upgrade(description) => {
            log::info!("Upgrading config from {}: {}", config.app.version, description);
            config.app = Default::default();
            config
        }
        MigrationStrategy::Recreate => {
            log::warn!(
                "Unsupported config version {}, falling back to defaults",
                config.app.version
            );
            HostConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &HostConfig) -> Result<()> {
    let toml_content = config.to_toml_string().context("Failed to serialize config")?;
    let content_with_header = format!(
        "# tree-host configuration\n\
         # Each [[views]] entry serves one directory as a tree view\n\
         \n\
         {}",
        toml_content
    );
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content_with_header)
        .with_context(|| format!("Failed to write config {}", path.display()))
}

/// Command line overrides on top of the file config. Each `--root` adds a view.
pub fn apply_overrides(config: &mut HostConfig, port: Option<u16>, roots: &[PathBuf]) {
    if let Some(port) = port {
        config.server.port = port;
    }
    for root in roots {
        let id = unique_view_id(config, root);
        config
            .views
            .push(ViewSection::new(id, root.to_string_lossy().to_string()));
    }
}

fn unique_view_id(config: &HostConfig, root: &Path) -> String {
    let base = root
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "files".to_string());
    (1usize..)
        .map(|n| if n == 1 { base.clone() } else { format!("{base}-{n}") })
        .find(|candidate| config.view(candidate).is_none())
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn save_then_load_keeps_views() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = HostConfig::default();
        config.refresh.debounce_ms = 50;
        config.views.push(ViewSection::new("docs", "/srv/docs"));

        save_config(&path, &config).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# tree-host configuration"));
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn unknown_version_is_recreated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[app]\nversion = \"0.1.0\"\n\n[[views]]\nid = \"old\"\nroot = \"/tmp\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.views.is_empty());
        assert_eq!(config.app.version, shared::AppSection::CURRENT_VERSION);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nport = ").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn roots_become_views_with_unique_ids() {
        let mut config = HostConfig::default();
        apply_overrides(
            &mut config,
            Some(9000),
            &[PathBuf::from("/work/src"), PathBuf::from("/other/src")],
        );

        assert_eq!(config.server.port, 9000);
        let ids: Vec<&str> = config.views.iter().map(|view| view.id.as_str()).collect();
        assert_eq!(ids, vec!["src", "src-2"]);
        assert!(config.views[0].watch);
    }
}
