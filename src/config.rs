use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// S3-compatible bucket the avatars are written to.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base of the URLs handed back to clients, e.g. a CDN in front of the bucket.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "usermanager".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "usermanager-users".into()),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60),
        };

        let endpoint = required("MEDIA_ENDPOINT")?;
        let media = MediaConfig {
            public_url: std::env::var("MEDIA_PUBLIC_URL").unwrap_or_else(|_| endpoint.clone()),
            endpoint,
            bucket: std::env::var("MEDIA_BUCKET").unwrap_or_else(|_| "avatars".into()),
            access_key: required("MEDIA_ACCESS_KEY")?,
            secret_key: required("MEDIA_SECRET_KEY")?,
            region: std::env::var("MEDIA_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".into()),
        );

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed_or("PORT", 4000),
            database_url,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 10),
            jwt,
            media,
            cors_origins,
            request_timeout_secs: parsed_or("REQUEST_TIMEOUT_SECS", 30),
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var {key}"))
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
