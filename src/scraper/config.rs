use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Name of the config file used when none is given on the command line.
pub const DEFAULT_CONFIG_NAME: &str = "imagenet_scraper.toml";

/// Base of the per-class URL list API. `{wnid}` is replaced by the class id.
pub const IMAGENET_URL_LIST_ENDPOINT: &str =
    "http://www.image-net.org/api/text/imagenet.synset.geturls?wnid={wnid}";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("data_root is required to run the scraper")]
    MissingDataRoot,

    #[error("folder {0} does not exist, provide an existing folder as data_root")]
    DataRootNotFound(String),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// What to scrape and how hard.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Scrape {
    pub scrape_only_flickr: bool,
    pub number_of_classes: usize,
    pub images_per_class: usize,
    pub use_class_list: bool,
    pub class_list: Vec<String>,
    pub ignore_image_count: bool,
    pub dry_run: bool,
    pub workers: usize,
}

impl Default for Scrape {
    fn default() -> Self {
        Self {
            scrape_only_flickr: true,
            number_of_classes: 10,
            images_per_class: 10,
            use_class_list: false,
            class_list: Vec::new(),
            ignore_image_count: false,
            dry_run: false,
            workers: 50,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Network {
    pub url_list_endpoint: String,
    pub image_timeout_ms: u64,
    pub url_list_timeout_secs: u64,
    /// Pause before asking the URL list API for the next class.
    pub url_list_delay_ms: u64,
    pub min_image_bytes: usize,
    pub user_agent: String,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            url_list_endpoint: IMAGENET_URL_LIST_ENDPOINT.to_string(),
            image_timeout_ms: 1000,
            url_list_timeout_secs: 30,
            url_list_delay_ms: 50,
            min_image_bytes: 1000,
            user_agent: format!("imagenet_scraper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Paths {
    pub data_root: String,
    pub catalog_file: String,
    pub stats_csv: String,
    pub log_file: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            data_root: String::new(),
            catalog_file: "imagenet_class_info.json".to_string(),
            stats_csv: "stats.csv".to_string(),
            log_file: "imagenet_scraper.log".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Logging {
    pub debug: bool,
    pub log_format: String,
    /// Print the aggregate report every this many attempts.
    pub report_every: u64,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            debug: false,
            log_format: "text".to_string(),
            report_every: 250,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scrape: Scrape,
    pub network: Network,
    pub paths: Paths,
    pub logging: Logging,
}

impl AppConfig {
    /// Folder that holds one sub folder per scraped class.
    pub fn images_root(&self) -> PathBuf {
        Path::new(&self.paths.data_root).join("imagenet_images")
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.network.image_timeout_ms)
    }

    pub fn url_list_timeout(&self) -> Duration {
        Duration::from_secs(self.network.url_list_timeout_secs)
    }

    /// Checks everything that has to hold before a single request is made.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.paths.data_root.is_empty() {
            return Err(ConfigError::MissingDataRoot);
        }
        if !Path::new(&self.paths.data_root).is_dir() {
            return Err(ConfigError::DataRootNotFound(self.paths.data_root.clone()));
        }
        if self.scrape.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.scrape.images_per_class == 0 {
            return Err(ConfigError::Invalid("images_per_class must be at least 1".to_string()));
        }
        if self.scrape.use_class_list && self.scrape.class_list.is_empty() {
            return Err(ConfigError::Invalid(
                "use_class_list is set but class_list is empty".to_string(),
            ));
        }
        if !self.network.url_list_endpoint.contains("{wnid}") {
            return Err(ConfigError::Invalid(
                "url_list_endpoint needs a {wnid} placeholder".to_string(),
            ));
        }
        if self.logging.report_every == 0 {
            return Err(ConfigError::Invalid("report_every must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    Ok(value.to_lowercase() == "true")
}

/// Command line overlay. Anything given here wins over the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "imagenet_scraper", version, about = "ImageNet image scraper")]
pub struct CliArgs {
    /// Config file to read (written with defaults when missing)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_parser = parse_bool)]
    pub scrape_only_flickr: Option<bool>,

    #[arg(long)]
    pub number_of_classes: Option<usize>,

    #[arg(long)]
    pub images_per_class: Option<usize>,

    #[arg(long)]
    pub data_root: Option<String>,

    #[arg(long, value_parser = parse_bool)]
    pub use_class_list: Option<bool>,

    #[arg(long, num_args = 0..)]
    pub class_list: Option<Vec<String>>,

    #[arg(long)]
    pub debug: bool,

    /// Ignores the number of images available per class
    #[arg(long)]
    pub ignore_image_count: bool,

    /// Don't download, only simulate
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub workers: Option<usize>,

    /// Class catalog JSON document
    #[arg(long)]
    pub catalog: Option<String>,
}

impl CliArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME))
    }

    /// Writes every flag that was given onto the loaded config.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(v) = self.scrape_only_flickr {
            config.scrape.scrape_only_flickr = v;
        }
        if let Some(v) = self.number_of_classes {
            config.scrape.number_of_classes = v;
        }
        if let Some(v) = self.images_per_class {
            config.scrape.images_per_class = v;
        }
        if let Some(v) = &self.data_root {
            config.paths.data_root = v.clone();
        }
        if let Some(v) = self.use_class_list {
            config.scrape.use_class_list = v;
        }
        if let Some(v) = &self.class_list {
            config.scrape.class_list = v.clone();
        }
        if let Some(v) = self.workers {
            config.scrape.workers = v;
        }
        if let Some(v) = &self.catalog {
            config.paths.catalog_file = v.clone();
        }
        config.logging.debug |= self.debug;
        config.scrape.ignore_image_count |= self.ignore_image_count;
        config.scrape.dry_run |= self.dry_run;
    }
}

/// Where the loaded values came from. Config is read before logging is up,
/// so this is reported once the subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    CreatedDefaults(PathBuf),
}

impl ConfigOrigin {
    pub fn log(&self) {
        match self {
            ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
            ConfigOrigin::CreatedDefaults(path) => {
                warn!("Config file not found: {}", path.display());
                info!("Created {} with default values", path.display());
            }
        }
    }
}

/// Loads `config.toml`-style files and layers the command line on top.
pub struct ConfigManager;

impl ConfigManager {
    /// Reads the config file, creating it with default values when missing.
    pub fn load_app_config(config_path: &Path) -> ConfigResult<(AppConfig, ConfigOrigin)> {
        if !config_path.exists() {
            let default_config = AppConfig::default();
            Self::save_app_config(config_path, &default_config)?;
            return Ok((
                default_config,
                ConfigOrigin::CreatedDefaults(config_path.to_path_buf()),
            ));
        }

        let content = fs::read_to_string(config_path)?;
        Ok((
            toml::from_str(&content)?,
            ConfigOrigin::File(config_path.to_path_buf()),
        ))
    }

    pub fn save_app_config(config_path: &Path, config: &AppConfig) -> ConfigResult<()> {
        let toml_string =
            toml::to_string_pretty(config).map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(config_path, toml_string)?;
        Ok(())
    }

    /// Resolves the final config for a run: file values, then flags, then validation.
    pub fn resolve(args: &CliArgs) -> ConfigResult<(AppConfig, ConfigOrigin)> {
        let (mut config, origin) = Self::load_app_config(&args.config_path())?;
        args.apply_to(&mut config);
        config.validate()?;
        Ok((config, origin))
    }
}
