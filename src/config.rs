//! Application configuration.
//!
//! Settings are layered: serde defaults, then `filesift.toml` (or an explicit
//! `--config` path), then `FILESIFT_*` environment overrides.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory for everything filesift persists: the SQLite database,
    /// the LanceDB table, the embedding model cache, and log files.
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// The file-type registry: maps extensions onto classification tags.
    pub types: Vec<FileTypeConfig>,
    pub scanner: ScannerConfig,
    pub dispatcher: DispatcherConfig,
    pub embedder: EmbedderConfig,
    pub processors: ProcessorsConfig,
    pub query: QueryConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage roots scanned for candidate files.
    pub roots: Vec<PathBuf>,
    /// Directory names pruned before descent (case-insensitive).
    pub ignored_directories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileTypeConfig {
    /// Classification tag, e.g. `image`.
    pub tag: String,
    /// Extensions (no leading dot) claimed by this tag.
    pub extensions: Vec<String>,
    /// Whether objects of this type must carry a resolution in their
    /// metadata, probed from the file at scan time.
    #[serde(default)]
    pub requires_resolution: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Seconds between full scan passes.
    pub pass_interval_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Sleep when no eligible object exists.
    pub idle_backoff_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Sleep when no eligible object exists.
    pub idle_backoff_secs: f64,
    /// Pause between successful embedding iterations.
    pub pause_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    /// Directory enumerated for `<id>.toml` processor manifests.
    pub directory: PathBuf,
    /// Caption model endpoint used by the built-in image processor.
    pub caption_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Default maximum distance when a search does not provide one.
    pub max_distance: f32,
    /// Default result cap.
    pub default_n_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Upper bound on `width * height` accepted from image headers.
    /// Dimensions beyond this are treated as decompression-bomb input.
    pub max_decode_pixels: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            types: vec![FileTypeConfig {
                tag: "image".to_string(),
                extensions: ["jpg", "jpeg", "png", "gif", "webp", "bmp"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                requires_resolution: true,
            }],
            scanner: ScannerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            embedder: EmbedderConfig::default(),
            processors: ProcessorsConfig::default(),
            query: QueryConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            ignored_directories: ["node_modules", "target", ".git", "$RECYCLE.BIN"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            pass_interval_secs: 30.0,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_backoff_secs: 1.0,
        }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            idle_backoff_secs: 1.0,
            pause_secs: 0.7,
        }
    }
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("processors"),
            caption_endpoint: "http://127.0.0.1:8090/v1/caption".to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_distance: 1.2,
            default_n_results: 35,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            // PIL's decompression-bomb default.
            max_decode_pixels: 178_956_970,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional explicit file, the default
    /// `filesift.toml` next to the working directory, and `FILESIFT_*`
    /// environment variables (`__` separates nesting levels).
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("filesift").required(false)),
        };

        let settings = builder
            .add_source(config::Environment::with_prefix("FILESIFT").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to read configuration: {e}"))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

        Ok(config)
    }

    /// Extension (lowercase, no dot) to type-rule lookup derived from the
    /// type registry.
    pub fn extension_rules(&self) -> HashMap<String, FileTypeConfig> {
        let mut rules = HashMap::new();
        for file_type in &self.types {
            for extension in &file_type.extensions {
                rules.insert(extension.to_lowercase(), file_type.clone());
            }
        }
        rules
    }

    /// Lowercased set of directory names the scanner prunes.
    pub fn ignored_directory_set(&self) -> HashSet<String> {
        self.storage
            .ignored_directories
            .iter()
            .map(|name| name.to_lowercase())
            .collect()
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("filesift.db")
    }

    pub fn lancedb_dir(&self) -> PathBuf {
        self.data_dir.join("lancedb")
    }

    pub fn embed_cache_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn bind_addr(&self) -> crate::error::Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server bind address: {e}").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_image_type() {
        let config = AppConfig::default();
        let rules = config.extension_rules();

        let rule = rules.get("png").expect("png rule");
        assert_eq!(rule.tag, "image");
        assert!(rule.requires_resolution);
        assert!(rules.contains_key("jpeg"));
        assert!(!rules.contains_key("txt"));
    }

    #[test]
    fn ignored_directories_compare_lowercased() {
        let config = AppConfig::default();
        let ignored = config.ignored_directory_set();

        assert!(ignored.contains("node_modules"));
        assert!(ignored.contains("$recycle.bin"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let toml_str = r#"
data_dir = "/var/lib/filesift"

[storage]
roots = ["/mnt/photos"]

[[types]]
tag = "document"
extensions = ["pdf"]

[query]
max_distance = 0.8
"#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filesift.toml");
        std::fs::write(&path, toml_str).expect("write config");

        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/filesift"));
        assert_eq!(config.storage.roots, vec![PathBuf::from("/mnt/photos")]);
        assert_eq!(config.types.len(), 1);
        assert_eq!(config.types[0].tag, "document");
        assert!(!config.types[0].requires_resolution);
        assert_eq!(config.query.max_distance, 0.8);
        // Unmentioned sections keep their defaults.
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.query.default_n_results, 35);
    }
}
