use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub cache: CacheConfig,
    pub codes: CodeConfig,
    pub analytics: AnalyticsConfig,
    /// Bound on every store call made from the redirect path
    pub store_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttl_secs: u64,
    pub max_entries: u64,
    pub timeout_ms: u64,
}

impl CacheConfig {
    pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            key_prefix: "snip:url:".to_string(),
            ttl_secs: Self::DEFAULT_TTL_SECS,
            max_entries: 100_000,
            timeout_ms: 50,
        }
    }
}

/// Shortest code the generator may be configured to produce
pub const MIN_CODE_LENGTH: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Salt for the short code encoding. Must not change once codes are issued.
    pub salt: String,
    pub min_length: usize,
    /// Name of the row in the `sequences` table that backs code generation
    pub sequence_name: String,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            salt: String::new(),
            min_length: MIN_CODE_LENGTH,
            sequence_name: "short_codes".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    None,
    IpApi,
    Maxmind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket peer address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub geo_provider: GeoProvider,
    pub geo_api_url: String,
    pub geoip_city_db_path: Option<String>,
    pub geoip_asn_db_path: Option<String>,
    pub geo_timeout_ms: u64,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    pub drain_grace_secs: u64,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

impl AnalyticsConfig {
    pub fn geo_timeout(&self) -> Duration {
        Duration::from_millis(self.geo_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geo_provider: GeoProvider::IpApi,
            geo_api_url: "http://ip-api.com/json".to_string(),
            geoip_city_db_path: None,
            geoip_asn_db_path: None,
            geo_timeout_ms: 3_000,
            queue_capacity: 10_000,
            max_in_flight: 64,
            drain_grace_secs: 5,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

fn code_min_length(value: usize) -> anyhow::Result<usize> {
    if value < MIN_CODE_LENGTH {
        anyhow::bail!("CODE_MIN_LENGTH must be at least {MIN_CODE_LENGTH}, got {value}");
    }
    Ok(value)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database = DatabaseConfig {
            backend,
            url: env_or("DATABASE_URL", "sqlite://./snip.db?mode=rwc"),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let api_server = ServerConfig {
            host: env_or("API_HOST", "127.0.0.1"),
            port: env_parse("API_PORT", 8080)?,
        };

        let redirect_server = ServerConfig {
            host: env_or("REDIRECT_HOST", "0.0.0.0"),
            port: env_parse("REDIRECT_PORT", 3000)?,
        };

        let cache_defaults = CacheConfig::default();
        let cache_backend = match env_or("CACHE_BACKEND", "memory").to_lowercase().as_str() {
            "memory" | "moka" => CacheBackend::Memory,
            "redis" => CacheBackend::Redis,
            other => {
                tracing::warn!(
                    "Unknown CACHE_BACKEND '{other}', falling back to 'memory'. Supported values: memory, redis"
                );
                CacheBackend::Memory
            }
        };
        let redis_url = std::env::var("REDIS_URL").ok();
        if cache_backend == CacheBackend::Redis && redis_url.is_none() {
            anyhow::bail!("REDIS_URL must be set when CACHE_BACKEND=redis");
        }

        let cache = CacheConfig {
            backend: cache_backend,
            redis_url,
            key_prefix: env_or("CACHE_KEY_PREFIX", &cache_defaults.key_prefix),
            ttl_secs: env_parse("CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
            max_entries: env_parse("CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            timeout_ms: env_parse("CACHE_TIMEOUT_MS", cache_defaults.timeout_ms)?,
        };

        let code_defaults = CodeConfig::default();
        let salt = std::env::var("CODE_SALT").unwrap_or_default();
        if salt.is_empty() {
            tracing::warn!("CODE_SALT is not set; short codes will follow the unsalted sequence");
        }
        let codes = CodeConfig {
            salt,
            min_length: code_min_length(env_parse("CODE_MIN_LENGTH", code_defaults.min_length)?)?,
            sequence_name: env_or("CODE_SEQUENCE_NAME", &code_defaults.sequence_name),
        };

        let analytics = Self::analytics_from_env()?;

        Ok(Config {
            database,
            api_server,
            redirect_server,
            cache,
            codes,
            analytics,
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS", 2_000)?,
        })
    }

    fn analytics_from_env() -> anyhow::Result<AnalyticsConfig> {
        let defaults = AnalyticsConfig::default();

        let geo_provider = match env_or("GEO_PROVIDER", "ip-api").to_lowercase().as_str() {
            "ip-api" | "ipapi" => GeoProvider::IpApi,
            "maxmind" => GeoProvider::Maxmind,
            "none" => GeoProvider::None,
            other => {
                tracing::warn!(
                    "Unknown GEO_PROVIDER '{other}', falling back to 'none'. Supported values: ip-api, maxmind, none"
                );
                GeoProvider::None
            }
        };

        let geoip_city_db_path = std::env::var("GEOIP_CITY_DB_PATH").ok();
        if geo_provider == GeoProvider::Maxmind && geoip_city_db_path.is_none() {
            anyhow::bail!("GEOIP_CITY_DB_PATH must be set when GEO_PROVIDER=maxmind");
        }

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none").to_lowercase().as_str() {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("TRUSTED_PROXIES contains an invalid CIDR: {s}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let num_trusted_proxies = match std::env::var("NUM_TRUSTED_PROXIES") {
            Ok(raw) => Some(
                raw.parse::<usize>()
                    .with_context(|| format!("NUM_TRUSTED_PROXIES has an invalid value: {raw}"))?,
            ),
            Err(_) => None,
        };

        Ok(AnalyticsConfig {
            enabled: env_flag("ANALYTICS_ENABLED", defaults.enabled),
            geo_provider,
            geo_api_url: env_or("GEO_API_URL", &defaults.geo_api_url),
            geoip_city_db_path,
            geoip_asn_db_path: std::env::var("GEOIP_ASN_DB_PATH").ok(),
            geo_timeout_ms: env_parse("GEO_TIMEOUT_MS", defaults.geo_timeout_ms)?,
            queue_capacity: env_parse("ANALYTICS_QUEUE_CAPACITY", defaults.queue_capacity)?,
            max_in_flight: env_parse("ANALYTICS_MAX_IN_FLIGHT", defaults.max_in_flight)?,
            drain_grace_secs: env_parse("ANALYTICS_DRAIN_GRACE_SECS", defaults.drain_grace_secs)?,
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
