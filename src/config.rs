use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: StorageLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
}

/// Where blob bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Database,
    Local,
}

impl BlobBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "database" | "db" => Some(BlobBackend::Database),
            "local" => Some(BlobBackend::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BlobBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
}

/// Capacity ceiling and thresholds of the blob store.
///
/// Fixed after startup; every quota component gets its own copy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageLimits {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
    #[serde(default = "default_warning_fraction")]
    pub warning_fraction: f64,
    #[serde(default = "default_cleanup_fraction")]
    pub cleanup_fraction: f64,
    #[serde(default = "default_critical_fraction")]
    pub critical_fraction: f64,
    #[serde(default = "default_target_fraction")]
    pub target_after_cleanup_fraction: f64,
    /// Unfinished records older than this are treated as abandoned
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    /// Upper bound of completed records considered by one reclamation run
    #[serde(default = "default_fallback_batch_size")]
    pub fallback_batch_size: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1310
}

fn default_max_upload() -> usize {
    100 * 1024 * 1024
}

fn default_db_path() -> String {
    "data/folio.db".to_string()
}

fn default_jwt_secret() -> String {
    "change-me-folio-secret".to_string()
}

fn default_backend() -> BlobBackend {
    BlobBackend::Database
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_max_bytes() -> i64 {
    512 * 1024 * 1024
}

fn default_warning_fraction() -> f64 {
    0.80
}

fn default_cleanup_fraction() -> f64 {
    0.90
}

fn default_critical_fraction() -> f64 {
    0.95
}

fn default_target_fraction() -> f64 {
    0.70
}

fn default_stale_after_days() -> i64 {
    30
}

fn default_fallback_batch_size() -> i64 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            previous_secrets: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_path: default_local_path(),
        }
    }
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            warning_fraction: default_warning_fraction(),
            cleanup_fraction: default_cleanup_fraction(),
            critical_fraction: default_critical_fraction(),
            target_after_cleanup_fraction: default_target_fraction(),
            stale_after_days: default_stale_after_days(),
            fallback_batch_size: default_fallback_batch_size(),
        }
    }
}

impl StorageLimits {
    /// Check threshold ordering and positivity
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_bytes <= 0 {
            anyhow::bail!("limits.max_bytes must be positive, got {}", self.max_bytes);
        }
        let ordered = 0.0 < self.warning_fraction
            && self.warning_fraction < self.cleanup_fraction
            && self.cleanup_fraction < self.critical_fraction
            && self.critical_fraction < 1.0;
        if !ordered {
            anyhow::bail!(
                "limits must satisfy 0 < warning ({}) < cleanup ({}) < critical ({}) < 1",
                self.warning_fraction,
                self.cleanup_fraction,
                self.critical_fraction
            );
        }
        if !(self.target_after_cleanup_fraction > 0.0
            && self.target_after_cleanup_fraction < self.cleanup_fraction)
        {
            anyhow::bail!(
                "limits.target_after_cleanup_fraction ({}) must be in (0, cleanup_fraction)",
                self.target_after_cleanup_fraction
            );
        }
        if self.stale_after_days <= 0 {
            anyhow::bail!("limits.stale_after_days must be positive");
        }
        if self.fallback_batch_size <= 0 {
            anyhow::bail!("limits.fallback_batch_size must be positive");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.limits.validate()?;
        config.ensure_directories()?;
        if config.jwt.secret == default_jwt_secret() {
            tracing::warn!("Using the built-in JWT secret; set FOLIO_CONF_JWT_SECRET in production");
        }
        tracing::info!(
            "Storage limits: max_bytes={}, warning={}, cleanup={}, critical={}, target={}",
            config.limits.max_bytes,
            config.limits.warning_fraction,
            config.limits.cleanup_fraction,
            config.limits.critical_fraction,
            config.limits.target_after_cleanup_fraction
        );
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: FOLIO_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("FOLIO_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("FOLIO_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("FOLIO_CONF_SERVER_MAX_UPLOAD_BYTES") {
            if let Ok(n) = val.parse() {
                self.server.max_upload_bytes = n;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("FOLIO_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT overrides
        if let Ok(val) = env::var("FOLIO_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Ok(val) = env::var("FOLIO_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }

        // Storage overrides
        if let Ok(val) = env::var("FOLIO_CONF_STORAGE_BACKEND") {
            match BlobBackend::from_str(&val) {
                Some(backend) => self.storage.backend = backend,
                None => tracing::warn!("Ignoring unknown storage backend {:?}", val),
            }
        }
        if let Ok(val) = env::var("FOLIO_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }

        // Limit overrides
        if let Ok(val) = env::var("FOLIO_CONF_LIMITS_MAX_BYTES") {
            if let Ok(n) = val.parse() {
                self.limits.max_bytes = n;
            }
        }
        override_fraction("FOLIO_CONF_LIMITS_WARNING_FRACTION", &mut self.limits.warning_fraction);
        override_fraction("FOLIO_CONF_LIMITS_CLEANUP_FRACTION", &mut self.limits.cleanup_fraction);
        override_fraction("FOLIO_CONF_LIMITS_CRITICAL_FRACTION", &mut self.limits.critical_fraction);
        override_fraction(
            "FOLIO_CONF_LIMITS_TARGET_AFTER_CLEANUP_FRACTION",
            &mut self.limits.target_after_cleanup_fraction,
        );
        if let Ok(val) = env::var("FOLIO_CONF_LIMITS_STALE_AFTER_DAYS") {
            if let Ok(days) = val.parse() {
                self.limits.stale_after_days = days;
            }
        }
        if let Ok(val) = env::var("FOLIO_CONF_LIMITS_FALLBACK_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.limits.fallback_batch_size = n;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == BlobBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}

fn override_fraction(key: &str, slot: &mut f64) {
    if let Ok(val) = env::var(key) {
        if let Ok(v) = val.parse() {
            *slot = v;
        }
    }
}
