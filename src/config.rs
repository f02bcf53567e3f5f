use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `HOTELIER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: String,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineSettings,
    /// Login user names that act as hotel staff. Everyone else is a guest.
    pub staff_users: Vec<String>,
}

/// Knobs handed to every per-property engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound on waiting for a booking or room lock.
    pub lock_timeout: Duration,
    /// Attempts the front end makes on transient storage errors.
    pub retry_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2_000),
            retry_attempts: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = EngineSettings::default();

        let staff_users = get("HOTELIER_STAFF_USERS")
            .unwrap_or_else(|| "staff".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            port: parse(get("HOTELIER_PORT")).unwrap_or(5433),
            bind: get("HOTELIER_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("HOTELIER_DATA_DIR").unwrap_or_else(|| "./data".into()),
            password: get("HOTELIER_PASSWORD").unwrap_or_else(|| "hotelier".into()),
            max_connections: parse(get("HOTELIER_MAX_CONNECTIONS")).unwrap_or(256),
            compact_threshold: parse(get("HOTELIER_COMPACT_THRESHOLD")).unwrap_or(1000),
            metrics_port: parse(get("HOTELIER_METRICS_PORT")),
            tls_cert: get("HOTELIER_TLS_CERT"),
            tls_key: get("HOTELIER_TLS_KEY"),
            engine: EngineSettings {
                lock_timeout: parse(get("HOTELIER_LOCK_TIMEOUT_MS"))
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.lock_timeout),
                retry_attempts: parse(get("HOTELIER_RETRY_ATTEMPTS"))
                    .unwrap_or(defaults.retry_attempts)
                    .max(1),
            },
            staff_users,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}
