use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    /// `None` runs the catalog in memory (development and tests)
    pub database: Option<DatabaseConfig>,
    pub auth: AuthConfig,
    pub swagger: SwaggerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

/// Bearer token validation settings.
///
/// Tokens are minted by an external identity service and signed with a
/// shared HS256 secret. The `sub` claim identifies the storage owner.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub leeway: Duration,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub title: String,
    pub version: String,
    pub description: String,
}

/// Physical storage layout on local disk
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory; chunk sessions live in `uploads/`, artifacts in `files/`
    pub root: PathBuf,
}

/// Limits applied by the chunk receiver and the session sweeper
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_chunk_bytes: usize,
    pub max_chunks: u32,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Limit used for owners without an explicit `storage_quotas` row
    pub default_limit_bytes: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            app: AppConfig::from_env()?,
            database: DatabaseConfig::from_env_optional()?,
            auth: AuthConfig::from_env()?,
            swagger: SwaggerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            upload: UploadConfig::from_env()?,
            quota: QuotaConfig::from_env()?,
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid PORT: {}", e))?;

        // Parse CORS allowed origins from comma-separated string
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            cors_allowed_origins,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    const DEFAULT_MIN_CONNECTIONS: u32 = 1;
    const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
    const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600; // 10 minutes
    const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800; // 30 minutes

    /// Returns `None` when `DATABASE_URL` is unset or empty
    pub fn from_env_optional() -> Result<Option<Self>, String> {
        match env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
            Some(url) => Self::with_url(url).map(Some),
            None => Ok(None),
        }
    }

    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
        Self::with_url(url)
    }

    fn with_url(url: String) -> Result<Self, String> {
        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| Self::DEFAULT_MAX_CONNECTIONS.to_string())
            .parse::<u32>()
            .map_err(|_| "DB_MAX_CONNECTIONS must be a valid number".to_string())?;

        let min_connections = env::var("DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| Self::DEFAULT_MIN_CONNECTIONS.to_string())
            .parse::<u32>()
            .map_err(|_| "DB_MIN_CONNECTIONS must be a valid number".to_string())?;

        let acquire_timeout_secs = env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_ACQUIRE_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "DB_ACQUIRE_TIMEOUT_SECS must be a valid number".to_string())?;

        let idle_timeout_secs = env::var("DB_IDLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_IDLE_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "DB_IDLE_TIMEOUT_SECS must be a valid number".to_string())?;

        let max_lifetime_secs = env::var("DB_MAX_LIFETIME_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_MAX_LIFETIME_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "DB_MAX_LIFETIME_SECS must be a valid number".to_string())?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
        })
    }
}

impl AuthConfig {
    const DEFAULT_JWT_LEEWAY_SECS: u64 = 60;

    pub fn from_env() -> Result<Self, String> {
        let secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "JWT_SECRET environment variable is required".to_string())?;

        let issuer = env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty());

        let leeway_secs = env::var("JWT_LEEWAY")
            .unwrap_or_else(|_| Self::DEFAULT_JWT_LEEWAY_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "JWT_LEEWAY must be a valid number".to_string())?;

        Ok(Self {
            secret,
            issuer,
            leeway: Duration::from_secs(leeway_secs),
        })
    }
}

impl SwaggerConfig {
    pub fn from_env() -> Result<Self, String> {
        // Only use credentials if they are non-empty
        let username = env::var("SWAGGER_USERNAME").ok().filter(|s| !s.is_empty());
        let password = env::var("SWAGGER_PASSWORD").ok().filter(|s| !s.is_empty());
        let title = env::var("SWAGGER_TITLE").unwrap_or_else(|_| "CloudVault API".to_string());
        let version = env::var("SWAGGER_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
        let description = env::var("SWAGGER_DESCRIPTION")
            .unwrap_or_else(|_| "Resumable chunked uploads with quota enforcement".to_string());

        Ok(Self {
            username,
            password,
            title,
            version,
            description,
        })
    }

    /// Returns credentials in "username:password" format if auth is enabled
    pub fn credentials(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(format!("{}:{}", user, pass)),
            _ => None,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, String> {
        let root = env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data".to_string());
        if root.trim().is_empty() {
            return Err("STORAGE_ROOT must not be empty".to_string());
        }

        Ok(Self {
            root: PathBuf::from(root),
        })
    }
}

impl UploadConfig {
    const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024; // 64MB
    const DEFAULT_MAX_CHUNKS: u32 = 100_000;
    const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
    const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;

    pub fn from_env() -> Result<Self, String> {
        let max_chunk_bytes = env::var("UPLOAD_MAX_CHUNK_BYTES")
            .unwrap_or_else(|_| Self::DEFAULT_MAX_CHUNK_BYTES.to_string())
            .parse::<usize>()
            .map_err(|_| "UPLOAD_MAX_CHUNK_BYTES must be a valid number".to_string())?;

        let max_chunks = env::var("UPLOAD_MAX_CHUNKS")
            .unwrap_or_else(|_| Self::DEFAULT_MAX_CHUNKS.to_string())
            .parse::<u32>()
            .map_err(|_| "UPLOAD_MAX_CHUNKS must be a valid number".to_string())?;

        let session_ttl_secs = env::var("UPLOAD_SESSION_TTL_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_SESSION_TTL_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "UPLOAD_SESSION_TTL_SECS must be a valid number".to_string())?;

        let sweep_interval_secs = env::var("UPLOAD_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| Self::DEFAULT_SWEEP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| "UPLOAD_SWEEP_INTERVAL_SECS must be a valid number".to_string())?;

        if max_chunk_bytes == 0 || max_chunks == 0 {
            return Err(
                "UPLOAD_MAX_CHUNK_BYTES and UPLOAD_MAX_CHUNKS must be positive".to_string(),
            );
        }

        Ok(Self {
            max_chunk_bytes,
            max_chunks,
            session_ttl: Duration::from_secs(session_ttl_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(1)),
        })
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: Self::DEFAULT_MAX_CHUNK_BYTES,
            max_chunks: Self::DEFAULT_MAX_CHUNKS,
            session_ttl: Duration::from_secs(Self::DEFAULT_SESSION_TTL_SECS),
            sweep_interval: Duration::from_secs(Self::DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl QuotaConfig {
    const DEFAULT_LIMIT_BYTES: i64 = 10 * 1024 * 1024 * 1024; // 10GB

    pub fn from_env() -> Result<Self, String> {
        let default_limit_bytes = env::var("QUOTA_DEFAULT_LIMIT_BYTES")
            .unwrap_or_else(|_| Self::DEFAULT_LIMIT_BYTES.to_string())
            .parse::<i64>()
            .map_err(|_| "QUOTA_DEFAULT_LIMIT_BYTES must be a valid number".to_string())?;

        if default_limit_bytes < 0 {
            return Err("QUOTA_DEFAULT_LIMIT_BYTES must not be negative".to_string());
        }

        Ok(Self {
            default_limit_bytes,
        })
    }
}
