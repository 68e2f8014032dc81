//! Normalizes image board responses into one record model and manages a browsing
//! session over them.

pub mod booru;
pub mod config;
pub mod logger;

pub use booru::{ImageList, ImageListEvent, ImageListOptions, Site, SiteType};
pub use config::{AppConfig, ConfigError, ConfigManager, ConfigResult, SitesConfig};
pub use logger::{Logger, LoggerError, LoggerResult};
