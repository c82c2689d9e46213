use serde::Deserialize;
use time::Duration;

/// Lifetimes of the three token scopes.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub activation_ttl_hours: i64,
    pub authentication_ttl_hours: i64,
    pub password_reset_ttl_minutes: i64,
}

impl TokenConfig {
    pub fn activation_ttl(&self) -> Duration {
        Duration::hours(self.activation_ttl_hours)
    }

    pub fn authentication_ttl(&self) -> Duration {
        Duration::hours(self.authentication_ttl_hours)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::minutes(self.password_reset_ttl_minutes)
    }
}

/// Argon2id work factor. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    pub tokens: TokenConfig,
    pub password: PasswordConfig,
    pub default_permissions: Vec<String>,
    pub mail_sender: String,
    pub background_max_tasks: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let tokens = TokenConfig {
            activation_ttl_hours: env_or("ACTIVATION_TOKEN_TTL_HOURS", 72),
            authentication_ttl_hours: env_or("AUTH_TOKEN_TTL_HOURS", 24),
            password_reset_ttl_minutes: env_or("PASSWORD_RESET_TOKEN_TTL_MINUTES", 45),
        };
        let password = PasswordConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", 19 * 1024),
            iterations: env_or("ARGON2_ITERATIONS", 2),
            parallelism: env_or("ARGON2_PARALLELISM", 1),
        };
        let default_permissions = parse_list(
            &std::env::var("DEFAULT_PERMISSIONS").unwrap_or_else(|_| "movies:read".into()),
        );

        Ok(Self {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 4000),
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            tokens,
            password,
            default_permissions,
            mail_sender: std::env::var("MAIL_SENDER")
                .unwrap_or_else(|_| "Greenlight <no-reply@greenlight.local>".into()),
            background_max_tasks: env_or("BACKGROUND_MAX_TASKS", 16),
        })
    }
}
