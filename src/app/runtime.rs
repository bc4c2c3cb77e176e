use std::io::BufRead;
use std::sync::mpsc;

use chrono::Utc;
use serde::Deserialize;

use crate::adapters::bridge::{BridgeMessage, BridgeSink, StdoutBridge};
use crate::adapters::ledger_http::{EventClient, HttpEventClient};
use crate::adapters::snapshot_db::{SnapshotStore, SqliteSnapshotStore};
use crate::app::config::AppConfig;
use crate::app::engine::SessionEngine;
use crate::app::error::AppError;
use crate::domain::geofence::{
    GeofenceTransition, MonitoredRegion, RegionMonitor, RegionMonitorError,
};
use crate::domain::models::{
    ActiveSession, ChargerTarget, Clock, GeoPoint, LocationSample, TimestampMs,
};

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

/// Region registration handled by the host shell; the native side only keeps
/// the FIFO bookkeeping, so registration here just logs.
#[derive(Debug, Clone, Copy)]
pub struct LoggingRegionMonitor;

impl RegionMonitor for LoggingRegionMonitor {
    fn start_monitoring(&mut self, region: &MonitoredRegion) -> Result<(), RegionMonitorError> {
        tracing::debug!(region_id = %region.id, radius_m = region.radius_m, "region monitoring started");
        Ok(())
    }

    fn stop_monitoring(&mut self, region_id: &str) -> Result<(), RegionMonitorError> {
        tracing::debug!(region_id, "region monitoring stopped");
        Ok(())
    }
}

/// One line of the host feed: location updates, geofence callbacks and UI /
/// backend signals, each a `type`-tagged JSON object.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCommand {
    #[serde(rename_all = "camelCase")]
    Location {
        lat: f64,
        lng: f64,
        timestamp: i64,
        #[serde(default)]
        speed: f64,
        #[serde(default)]
        horizontal_accuracy: f64,
    },
    #[serde(rename_all = "camelCase")]
    SetChargerTarget { id: String, lat: f64, lng: f64 },
    #[serde(rename_all = "camelCase")]
    MerchantActivated { id: String, lat: f64, lng: f64 },
    #[serde(rename_all = "camelCase")]
    SessionConfirmed {
        session_id: String,
        charger_id: String,
        merchant_id: String,
        started_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    GeofenceTransition { id: String, transition: String },
    #[serde(rename_all = "camelCase")]
    LocationAuthorization { status: String },
    CompleteSession,
    #[serde(rename_all = "camelCase")]
    CancelSession {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionRejected { reason: String },
    Shutdown,
}

/// Drains host commands into the engine until shutdown or sender drop. This
/// loop is the single owner of all engine state; every asynchronous input is
/// serialized through its channel.
pub fn run_engine_loop<M, E, S, B, C>(
    mut engine: SessionEngine<M, E, S, B, C>,
    commands: mpsc::Receiver<HostCommand>,
) where
    M: RegionMonitor,
    E: EventClient,
    S: SnapshotStore,
    B: BridgeSink,
    C: Clock,
{
    while let Ok(command) = commands.recv() {
        if matches!(command, HostCommand::Shutdown) {
            tracing::info!("engine loop shutting down");
            break;
        }
        dispatch(&mut engine, command);
    }
}

fn dispatch<M, E, S, B, C>(engine: &mut SessionEngine<M, E, S, B, C>, command: HostCommand)
where
    M: RegionMonitor,
    E: EventClient,
    S: SnapshotStore,
    B: BridgeSink,
    C: Clock,
{
    match command {
        HostCommand::Location {
            lat,
            lng,
            timestamp,
            speed,
            horizontal_accuracy,
        } => {
            engine.handle_location(LocationSample {
                point: GeoPoint::new(lat, lng),
                timestamp: TimestampMs(timestamp),
                speed,
                horizontal_accuracy,
            });
        }
        HostCommand::SetChargerTarget { id, lat, lng } => {
            engine.set_charger_target(ChargerTarget {
                id,
                location: GeoPoint::new(lat, lng),
            });
        }
        HostCommand::MerchantActivated { id, lat, lng } => {
            if let Err(rejection) = engine.confirm_merchant_activation(&id, GeoPoint::new(lat, lng))
            {
                tracing::warn!(merchant_id = %id, rejection = %rejection, "merchant activation rejected");
            }
        }
        HostCommand::SessionConfirmed {
            session_id,
            charger_id,
            merchant_id,
            started_at,
        } => {
            engine.confirm_session_started(ActiveSession {
                session_id,
                charger_id,
                merchant_id,
                started_at: TimestampMs(started_at),
            });
        }
        HostCommand::GeofenceTransition { id, transition } => match transition.as_str() {
            "enter" => engine.handle_geofence(&id, GeofenceTransition::Enter),
            "exit" => engine.handle_geofence(&id, GeofenceTransition::Exit),
            other => tracing::warn!(region_id = %id, transition = other, "unknown geofence transition"),
        },
        HostCommand::LocationAuthorization { status } => {
            // Permission changes never fire transitions on their own.
            tracing::info!(status = %status, "location authorization changed");
        }
        HostCommand::CompleteSession => engine.complete_session(),
        HostCommand::CancelSession { reason } => engine.cancel_session(reason.as_deref()),
        HostCommand::SessionRejected { reason } => engine.handle_backend_rejection(&reason),
        HostCommand::Shutdown => {}
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let store =
        SqliteSnapshotStore::open(&config.snapshot_db_path).map_err(AppError::storage_init)?;
    let events = HttpEventClient::new(
        &config.ledger_base_url,
        config.ledger_auth_token.clone(),
        config.retry_policy(),
    )
    .map_err(AppError::runtime)?;

    StdoutBridge.notify(BridgeMessage::NativeReady);

    let engine = SessionEngine::new(
        config.engine_config(),
        LoggingRegionMonitor,
        events,
        store,
        StdoutBridge,
        SystemClock,
    );

    let (sender, receiver) = mpsc::channel::<HostCommand>();
    let engine_handle = std::thread::spawn(move || run_engine_loop(engine, receiver));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(AppError::runtime)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<HostCommand>(trimmed) {
            Ok(command) => {
                let shutdown = matches!(command, HostCommand::Shutdown);
                if sender.send(command).is_err() {
                    break;
                }
                if shutdown {
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "unparseable host command");
                StdoutBridge.notify(BridgeMessage::Error {
                    request_id: None,
                    message: format!("unparseable host command: {error}"),
                });
            }
        }
    }

    drop(sender);
    engine_handle
        .join()
        .map_err(|_| AppError::runtime("engine thread panicked"))
}
