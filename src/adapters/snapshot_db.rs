use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::domain::models::{SessionSnapshot, SessionState, TimestampMs};

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS engine_snapshot (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    state TEXT NOT NULL,
    targeted_charger TEXT,
    merchant_target TEXT,
    active_session TEXT,
    grace_period_deadline_ms INTEGER,
    hard_timeout_deadline_ms INTEGER,
    saved_at_ms INTEGER NOT NULL,
    pending_event TEXT
);
"#,
)];

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot storage operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot column could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot carries unknown state: {0}")]
    UnknownState(String),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

/// Durable snapshot storage. A `save` replaces the previous snapshot as one
/// atomic unit; a crash never leaves a partially-applied snapshot behind.
pub trait SnapshotStore {
    fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), SnapshotStoreError>;
    fn load(&mut self) -> Result<Option<SessionSnapshot>, SnapshotStoreError>;
    fn clear(&mut self) -> Result<(), SnapshotStoreError>;
}

pub fn open_connection(path: &str) -> Result<Connection, SnapshotStoreError> {
    Connection::open(path).map_err(SnapshotStoreError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), SnapshotStoreError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(SnapshotStoreError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, SnapshotStoreError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub struct SqliteSnapshotStore {
    connection: Connection,
}

impl SqliteSnapshotStore {
    pub fn open(path: &str) -> Result<Self, SnapshotStoreError> {
        let mut connection = open_connection(path)?;
        run_migrations(&mut connection)?;
        Ok(Self { connection })
    }
}

fn to_json_column<T: serde::Serialize>(
    value: &Option<T>,
) -> Result<Option<String>, SnapshotStoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(SnapshotStoreError::from)
}

fn from_json_column<T: serde::de::DeserializeOwned>(
    column: Option<String>,
) -> Result<Option<T>, SnapshotStoreError> {
    column
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(SnapshotStoreError::from)
}

impl SnapshotStore for SqliteSnapshotStore {
    fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), SnapshotStoreError> {
        let targeted_charger = to_json_column(&snapshot.targeted_charger)?;
        let merchant_target = to_json_column(&snapshot.merchant_target)?;
        let active_session = to_json_column(&snapshot.active_session)?;
        let pending_event = to_json_column(&snapshot.pending_event)?;

        let transaction = self.connection.transaction()?;
        transaction.execute("DELETE FROM engine_snapshot", [])?;
        transaction.execute(
            "INSERT INTO engine_snapshot (slot, state, targeted_charger, merchant_target, active_session, grace_period_deadline_ms, hard_timeout_deadline_ms, saved_at_ms, pending_event)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.state.as_str(),
                targeted_charger,
                merchant_target,
                active_session,
                snapshot.grace_period_deadline.map(|t| t.0),
                snapshot.hard_timeout_deadline.map(|t| t.0),
                snapshot.saved_at.0,
                pending_event,
            ],
        )?;
        transaction.commit()?;

        Ok(())
    }

    fn load(&mut self) -> Result<Option<SessionSnapshot>, SnapshotStoreError> {
        let row = self
            .connection
            .query_row(
                "SELECT state, targeted_charger, merchant_target, active_session, grace_period_deadline_ms, hard_timeout_deadline_ms, saved_at_ms, pending_event
                 FROM engine_snapshot WHERE slot = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            state_raw,
            targeted_charger,
            merchant_target,
            active_session,
            grace_deadline,
            hard_deadline,
            saved_at,
            pending_event,
        )) = row
        else {
            return Ok(None);
        };

        let state: SessionState = state_raw
            .parse()
            .map_err(|_| SnapshotStoreError::UnknownState(state_raw))?;

        Ok(Some(SessionSnapshot {
            state,
            targeted_charger: from_json_column(targeted_charger)?,
            merchant_target: from_json_column(merchant_target)?,
            active_session: from_json_column(active_session)?,
            grace_period_deadline: grace_deadline.map(TimestampMs),
            hard_timeout_deadline: hard_deadline.map(TimestampMs),
            saved_at: TimestampMs(saved_at),
            pending_event: from_json_column(pending_event)?,
        }))
    }

    fn clear(&mut self) -> Result<(), SnapshotStoreError> {
        self.connection.execute("DELETE FROM engine_snapshot", [])?;
        Ok(())
    }
}
