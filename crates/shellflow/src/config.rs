#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub worker_id: String,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub idle_interval_ms: u64,
    pub error_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    pub cancel_flag_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let redis_url = env_or_fallback("SHELLFLOW_REDIS_URL", "REDIS_URL")
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let worker_id = env_or_fallback("SHELLFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let admin_addr = env_or_fallback("SHELLFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("SHELLFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let idle_interval_ms = env_or_fallback("SHELLFLOW_IDLE_INTERVAL_MS", "IDLE_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1_000);

        let error_interval_ms = env_or_fallback("SHELLFLOW_ERROR_INTERVAL_MS", "ERROR_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        let shutdown_grace_secs =
            env_or_fallback("SHELLFLOW_SHUTDOWN_GRACE_SECS", "SHUTDOWN_GRACE_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5);

        let cancel_flag_ttl_secs =
            env_or_fallback("SHELLFLOW_CANCEL_FLAG_TTL_SECS", "CANCEL_FLAG_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(3_600);

        Ok(Self {
            database_url,
            redis_url,
            worker_id,
            admin_addr,
            migrate_on_startup,
            idle_interval_ms,
            error_interval_ms,
            shutdown_grace_secs,
            cancel_flag_ttl_secs,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
