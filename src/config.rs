use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::booru::{DEFAULT_EXTENSIONS, DisplayZone, ImageListOptions, Site, SiteType};

const APP_CONFIG_FILE: &str = "config.toml";
const SITES_CONFIG_FILE: &str = "sites.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Unknown site: {0}")]
    UnknownSite(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paths {
    pub temp_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Limits {
    /// Records on each side of the current one whose full image is read ahead.
    pub cache_size: usize,
    pub supported_extensions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Display {
    /// `"local"`, `"utc"` or a numeric offset such as `"+09:00"`.
    pub timezone: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Paths,
    pub limits: Limits,
    pub display: Display,
    pub logging: Logging,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                temp_directory: std::env::temp_dir()
                    .join("booru_imagelist")
                    .to_string_lossy()
                    .into_owned(),
                log_directory: "./logs".to_string(),
            },
            limits: Limits {
                cache_size: 2,
                supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            },
            display: Display {
                timezone: "local".to_string(),
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
        }
    }
}

impl AppConfig {
    pub fn display_zone(&self) -> DisplayZone {
        // Unresolvable names fall back to each timestamp's own zone
        self.display.timezone.parse().unwrap_or_default()
    }

    pub fn image_list_options(&self) -> ImageListOptions {
        ImageListOptions {
            extensions: self.limits.supported_extensions.clone(),
            cache_size: self.limits.cache_size,
            zone: self.display_zone(),
        }
    }
}

// Config structs for sites.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SiteEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub site_type: SiteType,
    #[serde(default)]
    pub use_samples: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    8
}

impl SiteEntry {
    fn new(name: &str, url: &str, site_type: SiteType) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            site_type,
            use_samples: false,
            max_connections: default_max_connections(),
        }
    }

    pub fn to_site(&self) -> Site {
        Site::new(self.name.clone(), self.url.clone(), self.site_type)
            .with_samples(self.use_samples)
            .with_max_connections(self.max_connections)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SitesConfig {
    pub sites: Vec<SiteEntry>,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            sites: vec![
                SiteEntry::new("Danbooru", "https://danbooru.donmai.us", SiteType::DanbooruV2),
                SiteEntry::new("Gelbooru", "https://gelbooru.com", SiteType::Gelbooru),
                SiteEntry::new("Safebooru", "https://safebooru.org", SiteType::Gelbooru),
                SiteEntry::new("Konachan", "https://konachan.com", SiteType::Moebooru),
                SiteEntry::new("yande.re", "https://yande.re", SiteType::Moebooru),
            ],
        }
    }
}

impl SitesConfig {
    /// Looks a site up by name, ignoring case.
    pub fn site(&self, name: &str) -> ConfigResult<Site> {
        self.sites
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(SiteEntry::to_site)
            .ok_or_else(|| ConfigError::UnknownSite(name.to_string()))
    }
}

// Event type for config reloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReloadEvent {
    AppConfig,
    SitesConfig,
}

/// Owns `config.toml` and `sites.toml` in one directory.
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    sites_config: Arc<RwLock<SitesConfig>>,
    config_dir: PathBuf,
    reload_tx: broadcast::Sender<ConfigReloadEvent>,
}

impl ConfigManager {
    /// Loads both files, writing defaults for any that are missing.
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config: AppConfig = load_or_default(&config_dir.join(APP_CONFIG_FILE))?;
        let sites_config: SitesConfig = load_or_default(&config_dir.join(SITES_CONFIG_FILE))?;

        let (reload_tx, _) = broadcast::channel(16);

        Ok(Self {
            app_config: Arc::new(RwLock::new(app_config)),
            sites_config: Arc::new(RwLock::new(sites_config)),
            config_dir,
            reload_tx,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    // Get a subscription to config reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigReloadEvent> {
        self.reload_tx.subscribe()
    }

    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    pub fn get_sites_config(&self) -> SitesConfig {
        self.sites_config.read().clone()
    }

    /// Re-reads both files from disk and announces each one that changed.
    pub fn reload(&self) -> ConfigResult<()> {
        let app_config: AppConfig = load_or_default(&self.config_dir.join(APP_CONFIG_FILE))?;
        let sites_config: SitesConfig = load_or_default(&self.config_dir.join(SITES_CONFIG_FILE))?;

        if replace_if_changed(&self.app_config, app_config) {
            let _ = self.reload_tx.send(ConfigReloadEvent::AppConfig);
            info!("Reloaded app config");
        }
        if replace_if_changed(&self.sites_config, sites_config) {
            let _ = self.reload_tx.send(ConfigReloadEvent::SitesConfig);
            info!("Reloaded sites config");
        }
        Ok(())
    }

    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        write_toml(&self.config_dir.join(APP_CONFIG_FILE), config)?;
        *self.app_config.write() = config.clone();
        Ok(())
    }

    pub fn save_sites_config(&self, config: &SitesConfig) -> ConfigResult<()> {
        write_toml(&self.config_dir.join(SITES_CONFIG_FILE), config)?;
        *self.sites_config.write() = config.clone();
        Ok(())
    }
}

fn replace_if_changed<T: PartialEq>(slot: &RwLock<T>, value: T) -> bool {
    let mut current = slot.write();
    if *current == value {
        return false;
    }
    *current = value;
    true
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> ConfigResult<()> {
    let toml_string = toml::to_string_pretty(value)?;
    fs::write(path, toml_string)?;
    Ok(())
}

/// Reads a TOML file. Missing files are created with defaults; unparsable ones are moved
/// aside to `<name>.toml.backup` and replaced with defaults.
fn load_or_default<T>(path: &Path) -> ConfigResult<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    if !path.exists() {
        warn!("Config file not found, writing defaults: {}", path.display());
        let default_config = T::default();
        write_toml(path, &default_config)?;
        return Ok(default_config);
    }

    let content = fs::read_to_string(path)?;
    match toml::from_str(&content) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to parse {}: {}", path.display(), e);
            info!("Backing up old config and creating new one with default values");

            if let Err(backup_err) = fs::rename(path, path.with_extension("toml.backup")) {
                warn!("Failed to backup old config: {}", backup_err);
            }

            let default_config = T::default();
            if let Err(write_err) = write_toml(path, &default_config) {
                error!("Failed to write new config file: {}", write_err);
            }
            Ok(default_config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_defaults_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();

        assert!(dir.path().join("config.toml").is_file());
        assert!(dir.path().join("sites.toml").is_file());
        assert_eq!(manager.get_app_config(), AppConfig::default());
        assert_eq!(manager.get_sites_config().sites.len(), 5);
    }

    #[test]
    fn test_corrupted_config_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "paths = 12\n[[[").unwrap();

        let manager = ConfigManager::new(dir.path()).unwrap();

        assert_eq!(manager.get_app_config(), AppConfig::default());
        let backup = fs::read_to_string(dir.path().join("config.toml.backup")).unwrap();
        assert!(backup.contains("[[["));
        let rewritten = fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(toml::from_str::<AppConfig>(&rewritten).is_ok());
    }

    #[test]
    fn test_sites_file_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("sites.toml"),
            r#"
[[sites]]
name = "Konachan"
url = "https://konachan.com/"
type = "moebooru"
use_samples = true
"#,
        )
        .unwrap();

        let manager = ConfigManager::new(dir.path()).unwrap();
        let site = manager.get_sites_config().site("konachan").unwrap();

        assert_eq!(site.site_type(), SiteType::Moebooru);
        assert_eq!(site.url(), "https://konachan.com");
        assert!(site.use_samples());
        assert_eq!(site.max_connections(), 8);
        assert!(matches!(
            manager.get_sites_config().site("nowhere"),
            Err(ConfigError::UnknownSite(_))
        ));
    }

    #[test]
    fn test_reload_broadcasts_changes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path()).unwrap();
        let mut rx = manager.subscribe();

        let mut edited = manager.get_app_config();
        edited.limits.cache_size = 5;
        write_toml(&dir.path().join("config.toml"), &edited).unwrap();
        manager.reload().unwrap();

        assert_eq!(rx.try_recv().unwrap(), ConfigReloadEvent::AppConfig);
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.get_app_config().limits.cache_size, 5);

        // Nothing changed on disk
        manager.reload().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_display_zone_from_config() {
        let mut config = AppConfig::default();
        assert_eq!(config.display_zone(), DisplayZone::Local);

        config.display.timezone = "+09:00".to_string();
        let offset = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(config.image_list_options().zone, DisplayZone::Offset(offset));

        config.display.timezone = "Mars/Olympus".to_string();
        assert!(matches!(config.display_zone(), DisplayZone::Unresolved(_)));
    }
}
