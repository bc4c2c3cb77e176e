mod config;
pub mod engine;
mod error;
mod logging;
pub mod runtime;

pub use config::AppConfig;
pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        ledger_base_url = %config.ledger_base_url,
        snapshot_db_path = %config.snapshot_db_path,
        intent_radius_m = config.intent_radius_m,
        anchor_radius_m = config.anchor_radius_m,
        dwell_duration_ms = config.dwell_duration_ms,
        grace_window_ms = config.grace_window_ms,
        hard_timeout_ms = config.hard_timeout_ms,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
