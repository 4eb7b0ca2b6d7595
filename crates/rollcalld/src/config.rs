use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Used when `DATABASE_URL` is unset: a SQLite file in the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:///face_recognition.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported database URL scheme {0:?}: expected sqlite or postgres")]
    UnsupportedDatabase(String),
    #[error("database URL {0:?} has no path")]
    EmptyDatabasePath(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Where the student directory lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// Path to a SQLite database file.
    Sqlite(PathBuf),
    /// `postgresql://` connection string.
    Postgres(String),
}

impl fmt::Display for DatabaseUrl {
    /// Credentials are masked so the URL can be logged.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            Self::Postgres(url) => {
                let rest = url.strip_prefix(POSTGRES_SCHEME).unwrap_or(url);
                match rest.rsplit_once('@') {
                    Some((_, host)) => write!(f, "{POSTGRES_SCHEME}***@{host}"),
                    None => write!(f, "{url}"),
                }
            }
        }
    }
}

const POSTGRES_SCHEME: &str = "postgresql://";

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Debug mode: verbose logging.
    pub debug: bool,
    /// Student directory backend.
    pub database: DatabaseUrl,
    /// Root of the reference, capture and staging image directories.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine distance below which a match is accepted.
    pub distance_threshold: f32,
    /// Reject registrations in which the detector finds no face.
    pub require_face: bool,
    /// Requests the engine thread may have queued before callers get a 503.
    pub engine_queue_depth: usize,
    /// Upper bound on a single engine call.
    pub engine_timeout_secs: u64,
    /// Request body limit; captures arrive base64-encoded.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from the environment, with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let database = parse_database_url(&database_url)?;

        let host = match std::env::var("HOST") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: "HOST", value })?,
            Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        Ok(Self {
            host,
            port: env_parse("PORT", 5000),
            debug: env_flag("FLASK_DEBUG") || env_flag("ROLLCALL_DEBUG"),
            database,
            data_dir: std::env::var("ROLLCALL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| rollcall_core::default_model_dir()),
            distance_threshold: env_parse("ROLLCALL_DISTANCE_THRESHOLD", 0.40),
            require_face: std::env::var("ROLLCALL_REQUIRE_FACE")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            engine_queue_depth: env_parse::<usize>("ROLLCALL_ENGINE_QUEUE", 4).max(1),
            engine_timeout_secs: env_parse("ROLLCALL_ENGINE_TIMEOUT_SECS", 30),
            max_upload_bytes: env_parse("ROLLCALL_MAX_UPLOAD_BYTES", 16 * 1024 * 1024),
        })
    }

    /// Defaults rooted at `data_dir`, with the database inside it.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5000,
            debug: false,
            database: DatabaseUrl::Sqlite(data_dir.join("face_recognition.db")),
            data_dir: data_dir.to_path_buf(),
            model_dir: rollcall_core::default_model_dir(),
            distance_threshold: 0.40,
            require_face: true,
            engine_queue_depth: 4,
            engine_timeout_secs: 30,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// Resolve a database URL.
///
/// SQLite accepts `sqlite:///relative.db`, `sqlite:////absolute.db`,
/// `sqlite://file.db`, `sqlite:file.db` and bare paths. Postgres accepts
/// `postgres://`, `postgresql://` and driver-qualified
/// `postgresql+<driver>://` URLs, all normalised to `postgresql://`.
pub fn parse_database_url(url: &str) -> Result<DatabaseUrl, ConfigError> {
    let url = url.trim();
    if let Some((scheme, rest)) = url.split_once("://") {
        let dialect = scheme.split('+').next().unwrap_or(scheme);
        if matches!(dialect, "postgres" | "postgresql") {
            if rest.is_empty() {
                return Err(ConfigError::EmptyDatabasePath(url.to_string()));
            }
            return Ok(DatabaseUrl::Postgres(format!("{POSTGRES_SCHEME}{rest}")));
        }
    }

    let path = if let Some(rest) = url.strip_prefix("sqlite:///") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite:") {
        rest
    } else if url.contains("://") {
        return Err(ConfigError::UnsupportedDatabase(url.to_string()));
    } else {
        url
    };

    if path.is_empty() {
        return Err(ConfigError::EmptyDatabasePath(url.to_string()));
    }
    Ok(DatabaseUrl::Sqlite(PathBuf::from(path)))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
