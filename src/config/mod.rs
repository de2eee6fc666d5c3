use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the conversion service
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum upload size in bytes (default: 100 MB)
    pub max_file_size: usize,

    /// Directory holding staged uploads and intermediate artifacts (default: "temp_files")
    pub staging_dir: PathBuf,

    /// Grace period between a response finishing and its artifacts being removed (default: 2s)
    pub cleanup_delay: Duration,

    /// Staged entries older than this are removed by the sweeper (default: 60 min)
    pub staging_max_age: Duration,

    /// How often the sweeper runs (default: 10 min)
    pub sweep_interval: Duration,

    /// Allowed CORS Origins (comma separated, "*" allows any)
    pub allowed_origins: Vec<String>,

    /// Explicit path to the pdfium shared library; the system library is used when unset
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024, // 100 MB
            staging_dir: PathBuf::from("temp_files"),
            cleanup_delay: Duration::from_secs(2),
            staging_max_age: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(600),
            allowed_origins: vec![
                "http://localhost:5173".to_string(), // Vite default
                "http://localhost:3000".to_string(),
                "*".to_string(),
            ],
            pdfium_library_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            cleanup_delay: env::var("CLEANUP_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.cleanup_delay),

            staging_max_age: env::var("STAGING_MAX_AGE_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(default.staging_max_age),

            sweep_interval: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or(default.allowed_origins),

            pdfium_library_path: env::var("PDFIUM_LIB_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Create config for development and tests (short grace period, any origin)
    pub fn development() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            staging_dir: env::temp_dir().join("pdf-unlocker-staging"),
            cleanup_delay: Duration::from_millis(200),
            staging_max_age: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            allowed_origins: vec!["*".to_string()],
            pdfium_library_path: None,
        }
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
