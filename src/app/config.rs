use crate::adapters::ledger_http::RetryPolicy;
use crate::app::AppError;
use crate::app::engine::EngineConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ledger_base_url: String,
    pub ledger_auth_token: Option<String>,
    pub snapshot_db_path: String,
    pub intent_radius_m: f64,
    pub anchor_radius_m: f64,
    pub dwell_duration_ms: i64,
    pub speed_threshold_mps: f64,
    pub grace_window_ms: i64,
    pub hard_timeout_ms: i64,
    pub max_regions: usize,
    pub emit_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_max_ms: u64,
    pub event_source: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ledger_base_url = lookup("LEDGER_BASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::config("LEDGER_BASE_URL is required"))?;

        Ok(Self {
            ledger_base_url,
            ledger_auth_token: lookup("LEDGER_AUTH_TOKEN")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            snapshot_db_path: lookup("SNAPSHOT_DB_PATH")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "/var/lib/charge-visit/session.db".to_string()),
            intent_radius_m: parse_or_default(&lookup, "INTENT_RADIUS_M", 150.0_f64)?,
            anchor_radius_m: parse_or_default(&lookup, "ANCHOR_RADIUS_M", 30.0_f64)?,
            dwell_duration_ms: parse_or_default(&lookup, "DWELL_DURATION_MS", 120_000_i64)?,
            speed_threshold_mps: parse_or_default(&lookup, "SPEED_THRESHOLD_MPS", 2.5_f64)?,
            grace_window_ms: parse_or_default(&lookup, "GRACE_WINDOW_MS", 900_000_i64)?,
            hard_timeout_ms: parse_or_default(&lookup, "HARD_TIMEOUT_MS", 14_400_000_i64)?,
            max_regions: parse_or_default(&lookup, "MAX_REGIONS", 2_usize)?,
            emit_max_attempts: parse_or_default(&lookup, "EMIT_MAX_ATTEMPTS", 3_u32)?,
            backoff_base_ms: parse_or_default(&lookup, "BACKOFF_BASE_MS", 500_u64)?,
            backoff_jitter_max_ms: parse_or_default(&lookup, "BACKOFF_JITTER_MAX_MS", 250_u64)?,
            event_source: lookup("EVENT_SOURCE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "mobile-native".to_string()),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            intent_radius_m: self.intent_radius_m,
            anchor_radius_m: self.anchor_radius_m,
            dwell_duration_ms: self.dwell_duration_ms,
            speed_threshold_mps: self.speed_threshold_mps,
            grace_window_ms: self.grace_window_ms,
            hard_timeout_ms: self.hard_timeout_ms,
            max_regions: self.max_regions,
            source: self.event_source.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.emit_max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_jitter_max_ms: self.backoff_jitter_max_ms,
        }
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
