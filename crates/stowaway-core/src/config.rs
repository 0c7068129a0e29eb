//! Facade configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/stowaway/config.toml)
//! 3. Environment variables (STOWAWAY_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::paths::StorageCategory;

/// Environment variable prefix
const ENV_PREFIX: &str = "STOWAWAY";

/// Baseline pixel density (dots per inch) used when no display reports one
pub const DEFAULT_DEVICE_DENSITY: u32 = 160;

/// Facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// App-private root, always available
    #[serde(default = "default_internal_root")]
    pub internal_root: PathBuf,

    /// Removable root, preferred when mounted writable
    #[serde(default)]
    pub external_root: Option<PathBuf>,

    /// Directory name for the documents category
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    /// Directory name for the pictures category
    #[serde(default = "default_pictures_dir")]
    pub pictures_dir: String,

    /// Density images are decoded for
    #[serde(default = "default_device_density")]
    pub device_density: u32,

    /// JPEG quality (1-100) used when saving `.jpg` targets
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Upper bound on concurrently running background operations
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            internal_root: default_internal_root(),
            external_root: None,
            documents_dir: default_documents_dir(),
            pictures_dir: default_pictures_dir(),
            device_density: default_device_density(),
            jpeg_quality: default_jpeg_quality(),
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

impl Config {
    /// Create a configuration rooted at an explicit internal directory
    pub fn with_internal_root(root: impl Into<PathBuf>) -> Self {
        Self {
            internal_root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (STOWAWAY_INTERNAL_ROOT, STOWAWAY_EXTERNAL_ROOT, ...)
    /// 2. Config file (~/.config/stowaway/config.toml or STOWAWAY_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.normalize();
        config.ensure_internal_root()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_INTERNAL_ROOT", ENV_PREFIX)) {
            self.internal_root = PathBuf::from(val);
        }

        // Empty string means "no removable storage"
        if let Ok(val) = std::env::var(format!("{}_EXTERNAL_ROOT", ENV_PREFIX)) {
            self.external_root = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var(format!("{}_DOCUMENTS_DIR", ENV_PREFIX)) {
            self.documents_dir = val;
        }

        if let Ok(val) = std::env::var(format!("{}_PICTURES_DIR", ENV_PREFIX)) {
            self.pictures_dir = val;
        }

        if let Some(val) = parse_env("DEVICE_DENSITY") {
            self.device_density = val;
        }

        if let Some(val) = parse_env("JPEG_QUALITY") {
            self.jpeg_quality = val;
        }

        if let Some(val) = parse_env("MAX_CONCURRENT_OPERATIONS") {
            self.max_concurrent_operations = val;
        }
    }

    /// Clamp numeric settings into their valid ranges
    fn normalize(&mut self) {
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.max_concurrent_operations = self.max_concurrent_operations.max(1);
        if self.device_density == 0 {
            self.device_density = DEFAULT_DEVICE_DENSITY;
        }
    }

    /// Ensure the internal root exists
    fn ensure_internal_root(&self) -> Result<()> {
        if !self.internal_root.exists() {
            std::fs::create_dir_all(&self.internal_root).with_context(|| {
                format!(
                    "Failed to create internal storage root: {:?}",
                    self.internal_root
                )
            })?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with STOWAWAY_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stowaway")
            .join("config.toml")
    }

    /// Directory name a category maps to under either root
    pub fn category_dir(&self, category: StorageCategory) -> &str {
        match category {
            StorageCategory::Documents => &self.documents_dir,
            StorageCategory::Pictures => &self.pictures_dir,
        }
    }
}

/// Read and parse a numeric `STOWAWAY_*` variable, ignoring junk
fn parse_env<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    let name = format!("{}_{}", ENV_PREFIX, suffix);
    let raw = std::env::var(&name).ok()?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

fn default_internal_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stowaway")
}

fn default_documents_dir() -> String {
    "documents".to_string()
}

fn default_pictures_dir() -> String {
    "pictures".to_string()
}

fn default_device_density() -> u32 {
    DEFAULT_DEVICE_DENSITY
}

fn default_jpeg_quality() -> u8 {
    100
}

fn default_max_concurrent_operations() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes every test that touches STOWAWAY_* variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "STOWAWAY_INTERNAL_ROOT",
        "STOWAWAY_EXTERNAL_ROOT",
        "STOWAWAY_DOCUMENTS_DIR",
        "STOWAWAY_PICTURES_DIR",
        "STOWAWAY_DEVICE_DENSITY",
        "STOWAWAY_JPEG_QUALITY",
        "STOWAWAY_MAX_CONCURRENT_OPERATIONS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.external_root.is_none());
        assert!(config.internal_root.ends_with("stowaway"));
        assert_eq!(config.device_density, DEFAULT_DEVICE_DENSITY);
        assert_eq!(config.jpeg_quality, 100);
        assert_eq!(config.max_concurrent_operations, 16);
    }

    #[test]
    fn test_category_dirs() {
        let config = Config::default();
        assert_eq!(config.category_dir(StorageCategory::Documents), "documents");
        assert_eq!(config.category_dir(StorageCategory::Pictures), "pictures");
    }

    #[test]
    fn test_env_override_roots() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("STOWAWAY_INTERNAL_ROOT", "/tmp/stowaway-internal");
        env::set_var("STOWAWAY_EXTERNAL_ROOT", "/media/sdcard");
        config.apply_env_overrides();

        assert_eq!(config.internal_root, PathBuf::from("/tmp/stowaway-internal"));
        assert_eq!(config.external_root, Some(PathBuf::from("/media/sdcard")));

        // Empty string clears it
        env::set_var("STOWAWAY_EXTERNAL_ROOT", "");
        config.apply_env_overrides();
        assert!(config.external_root.is_none());
    }

    #[test]
    fn test_env_override_numbers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("STOWAWAY_DEVICE_DENSITY", "480");
        env::set_var("STOWAWAY_MAX_CONCURRENT_OPERATIONS", "4");
        env::set_var("STOWAWAY_JPEG_QUALITY", "not-a-number");
        config.apply_env_overrides();

        assert_eq!(config.device_density, 480);
        assert_eq!(config.max_concurrent_operations, 4);
        assert_eq!(config.jpeg_quality, 100);
    }

    #[test]
    fn test_normalize_clamps() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            jpeg_quality = 0
            max_concurrent_operations = 0
            device_density = 0
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.jpeg_quality, 1);
        assert_eq!(config.max_concurrent_operations, 1);
        assert_eq!(config.device_density, DEFAULT_DEVICE_DENSITY);
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            internal_root: PathBuf::from("/data/app"),
            external_root: Some(PathBuf::from("/media/card")),
            device_density: 320,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("internal_root"));
        assert!(toml_str.contains("external_root"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.internal_root, config.internal_root);
        assert_eq!(parsed.external_root, config.external_root);
        assert_eq!(parsed.device_density, 320);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            internal_root = "/custom/data"
            external_root = "/media/card"
            pictures_dir = "DCIM"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.internal_root, PathBuf::from("/custom/data"));
        assert_eq!(config.external_root, Some(PathBuf::from("/media/card")));
        assert_eq!(config.category_dir(StorageCategory::Pictures), "DCIM");
        assert_eq!(config.category_dir(StorageCategory::Documents), "documents");
    }

    #[test]
    fn test_load_from_path_creates_internal_root() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("app-private");

        env::set_var("STOWAWAY_INTERNAL_ROOT", &root);
        let config = Config::load_from_path(&PathBuf::from("/nonexistent/config.toml")).unwrap();

        assert_eq!(config.internal_root, root);
        assert!(root.is_dir());
    }
}
