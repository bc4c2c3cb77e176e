use serde_json::json;
use thiserror::Error;

use crate::adapters::bridge::{BridgeMessage, BridgeSink, REASON_INVALID_MERCHANT_LOCATION};
use crate::adapters::ledger_http::EventClient;
use crate::adapters::snapshot_db::SnapshotStore;
use crate::domain::dwell::DwellDetector;
use crate::domain::events::{EmissionOutcome, EventName, PendingEvent};
use crate::domain::geofence::{GeofenceManager, GeofenceTransition, RegionMonitor};
use crate::domain::models::{
    ActiveSession, ChargerTarget, Clock, GeoPoint, LocationSample, MerchantTarget,
    SessionSnapshot, SessionState, TimestampMs,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub intent_radius_m: f64,
    pub anchor_radius_m: f64,
    pub dwell_duration_ms: i64,
    pub speed_threshold_mps: f64,
    pub grace_window_ms: i64,
    pub hard_timeout_ms: i64,
    pub max_regions: usize,
    pub source: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionStartRejection {
    #[error("merchant coordinates are the degenerate (0,0) point")]
    InvalidMerchantLocation,
}

/// Orchestrates the session lifecycle. All mutation happens on the single
/// thread that owns this value; asynchronous inputs are funneled here through
/// the runtime's channel.
pub struct SessionEngine<M, E, S, B, C> {
    config: EngineConfig,
    clock: C,
    events: E,
    store: S,
    bridge: B,
    geofences: GeofenceManager<M>,
    dwell: DwellDetector,
    state: SessionState,
    charger: Option<ChargerTarget>,
    merchant: Option<MerchantTarget>,
    active_session: Option<ActiveSession>,
    grace_period_deadline: Option<TimestampMs>,
    hard_timeout_deadline: Option<TimestampMs>,
    pending_event: Option<PendingEvent>,
    last_location: Option<LocationSample>,
}

impl<M, E, S, B, C> SessionEngine<M, E, S, B, C>
where
    M: RegionMonitor,
    E: EventClient,
    S: SnapshotStore,
    B: BridgeSink,
    C: Clock,
{
    /// Builds the engine and restores the last persisted snapshot. A restored
    /// PendingEvent is flushed before deadlines are evaluated, so a crash
    /// between "sent" and "acknowledged" never silently advances past an
    /// unconfirmed billing event.
    pub fn new(config: EngineConfig, monitor: M, events: E, store: S, bridge: B, clock: C) -> Self {
        let dwell = DwellDetector::new(
            config.anchor_radius_m,
            config.dwell_duration_ms,
            config.speed_threshold_mps,
        );
        let geofences = GeofenceManager::new(monitor, config.max_regions);

        let mut engine = Self {
            config,
            clock,
            events,
            store,
            bridge,
            geofences,
            dwell,
            state: SessionState::Idle,
            charger: None,
            merchant: None,
            active_session: None,
            grace_period_deadline: None,
            hard_timeout_deadline: None,
            pending_event: None,
            last_location: None,
        };
        engine.restore();
        engine
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.active_session.as_ref()
    }

    pub fn grace_period_deadline(&self) -> Option<TimestampMs> {
        self.grace_period_deadline
    }

    pub fn hard_timeout_deadline(&self) -> Option<TimestampMs> {
        self.hard_timeout_deadline
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending_event.is_some()
    }

    fn restore(&mut self) {
        let snapshot = match self.store.load() {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::error!(error = %error, "snapshot restore failed; starting fresh");
                None
            }
        };
        let Some(snapshot) = snapshot else {
            return;
        };

        tracing::info!(
            state = snapshot.state.as_str(),
            pending = snapshot.pending_event.is_some(),
            "restoring session snapshot"
        );

        self.state = snapshot.state;
        self.charger = snapshot.targeted_charger;
        self.merchant = snapshot.merchant_target;
        self.active_session = snapshot.active_session;
        self.grace_period_deadline = snapshot.grace_period_deadline;
        self.hard_timeout_deadline = snapshot.hard_timeout_deadline;
        self.pending_event = snapshot.pending_event;

        // Platform region registrations do not survive a process restart.
        if !self.state.is_terminal() {
            if let Some(charger) = self.charger.clone() {
                self.geofences.add_target_geofence(
                    &charger.id,
                    charger.location,
                    self.config.intent_radius_m,
                    true,
                );
            }
            if let Some(merchant) = self.merchant.clone() {
                self.geofences.add_target_geofence(
                    &merchant.id,
                    merchant.location,
                    self.config.intent_radius_m,
                    false,
                );
            }
        }

        // Flush before any deadline-driven auto-termination.
        if self.pending_event.is_some() {
            self.flush_pending();
        }
        self.check_deadlines();
    }

    /// Retry a retained event and re-evaluate deadlines. Called at the top of
    /// every input handler; later inputs are the "later opportunities" at
    /// which a retained PendingEvent is retried.
    fn note_input(&mut self) {
        if self.pending_event.is_some() {
            self.flush_pending();
        }
        self.check_deadlines();
    }

    pub fn set_charger_target(&mut self, target: ChargerTarget) {
        self.note_input();

        if !matches!(self.state, SessionState::Idle | SessionState::NearCharger) {
            tracing::warn!(state = self.state.as_str(), "ignoring charger target in current state");
            return;
        }

        self.geofences.add_target_geofence(
            &target.id,
            target.location,
            self.config.intent_radius_m,
            true,
        );
        self.dwell.reset();
        let location = target.location;
        self.charger = Some(target);

        let inside = self
            .last_location
            .is_some_and(|sample| sample.point.distance_meters(&location) <= self.config.intent_radius_m);

        match (self.state, inside) {
            (SessionState::Idle, true) => self.transition(SessionState::NearCharger, None),
            (SessionState::NearCharger, false) => self.transition(SessionState::Idle, None),
            _ => self.persist(),
        }
    }

    pub fn handle_location(&mut self, sample: LocationSample) {
        self.note_input();
        self.last_location = Some(sample);

        match self.state {
            SessionState::Idle => {
                if let Some(charger) = &self.charger
                    && sample.point.distance_meters(&charger.location) <= self.config.intent_radius_m
                {
                    self.transition(SessionState::NearCharger, None);
                }
            }
            SessionState::NearCharger => {
                let Some(charger) = self.charger.clone() else {
                    return;
                };
                let distance = sample.point.distance_meters(&charger.location);
                self.dwell.record_sample(sample.timestamp, distance, sample.speed);
                if self.dwell.is_anchored() {
                    let event = self.build_event(
                        EventName::ChargerAnchored,
                        SessionState::Anchored,
                        Some(json!({ "chargerId": charger.id })),
                    );
                    self.transition(SessionState::Anchored, Some(event));
                }
            }
            SessionState::InTransit | SessionState::SessionActive => {
                if let Some(merchant) = self.merchant.clone()
                    && sample.point.distance_meters(&merchant.location) <= self.config.anchor_radius_m
                {
                    self.note_merchant_arrival(&merchant.id);
                }
            }
            SessionState::Anchored | SessionState::SessionEnded => {}
        }
    }

    pub fn handle_geofence(&mut self, region_id: &str, transition: GeofenceTransition) {
        self.note_input();

        let Some(event) = self.geofences.transition(region_id, transition) else {
            tracing::debug!(region_id, "dropping transition for unmonitored region");
            return;
        };

        let is_charger = self
            .charger
            .as_ref()
            .is_some_and(|c| c.id == event.region_id);
        let is_merchant = self
            .merchant
            .as_ref()
            .is_some_and(|m| m.id == event.region_id);

        match (self.state, event.transition) {
            (SessionState::Idle, GeofenceTransition::Enter) if is_charger => {
                self.transition(SessionState::NearCharger, None);
            }
            (SessionState::NearCharger, GeofenceTransition::Exit) if is_charger => {
                self.dwell.reset();
                self.transition(SessionState::Idle, None);
            }
            (SessionState::InTransit | SessionState::SessionActive, GeofenceTransition::Enter)
                if is_merchant =>
            {
                let merchant_id = event.region_id.clone();
                self.note_merchant_arrival(&merchant_id);
            }
            _ => {}
        }
    }

    /// External confirmation of a merchant/exclusive activation. A degenerate
    /// (0,0) coordinate is rejected synchronously with no state change.
    pub fn confirm_merchant_activation(
        &mut self,
        merchant_id: &str,
        location: GeoPoint,
    ) -> Result<(), SessionStartRejection> {
        self.note_input();

        if self.state != SessionState::Anchored {
            tracing::warn!(state = self.state.as_str(), "ignoring merchant activation in current state");
            return Ok(());
        }

        if location.is_degenerate() {
            tracing::warn!(merchant_id, "rejecting merchant activation at (0,0)");
            self.bridge.notify(BridgeMessage::SessionStartRejected {
                reason: REASON_INVALID_MERCHANT_LOCATION.to_string(),
            });
            return Err(SessionStartRejection::InvalidMerchantLocation);
        }

        self.geofences.add_target_geofence(
            merchant_id,
            location,
            self.config.intent_radius_m,
            false,
        );
        self.merchant = Some(MerchantTarget {
            id: merchant_id.to_string(),
            location,
        });
        self.grace_period_deadline =
            Some(TimestampMs(self.clock.now().0 + self.config.grace_window_ms));

        let charger_id = self.charger.as_ref().map(|c| c.id.clone());
        let event = self.build_event(
            EventName::MerchantVisitCommitted,
            SessionState::InTransit,
            Some(json!({ "merchantId": merchant_id, "chargerId": charger_id })),
        );
        self.transition(SessionState::InTransit, Some(event));
        Ok(())
    }

    /// The backend confirmed a started billing session.
    pub fn confirm_session_started(&mut self, session: ActiveSession) {
        self.note_input();

        if self.state != SessionState::InTransit {
            tracing::warn!(state = self.state.as_str(), "ignoring session confirmation in current state");
            return;
        }

        let mut hard = TimestampMs(self.clock.now().0 + self.config.hard_timeout_ms);
        // Invariant: hard timeout never precedes the grace deadline.
        if let Some(grace) = self.grace_period_deadline
            && hard < grace
        {
            hard = grace;
        }
        self.hard_timeout_deadline = Some(hard);
        self.active_session = Some(session);
        self.transition(SessionState::SessionActive, None);
    }

    pub fn complete_session(&mut self) {
        self.note_input();

        if self.state != SessionState::SessionActive {
            tracing::warn!(state = self.state.as_str(), "ignoring completion in current state");
            return;
        }

        let event = self.build_event(EventName::SessionCompleted, SessionState::SessionEnded, None);
        self.transition(SessionState::SessionEnded, Some(event));
    }

    pub fn cancel_session(&mut self, reason: Option<&str>) {
        self.note_input();

        if self.state.is_terminal() {
            return;
        }

        tracing::info!(reason = reason.unwrap_or("user_cancelled"), "session cancelled");
        let event = self.active_session.is_some().then(|| {
            self.build_event(
                EventName::SessionCancelled,
                SessionState::SessionEnded,
                Some(json!({ "reason": reason.unwrap_or("user_cancelled") })),
            )
        });
        self.transition(SessionState::SessionEnded, event);
    }

    /// Irrecoverable backend rejection of the session start.
    pub fn handle_backend_rejection(&mut self, reason: &str) {
        self.note_input();

        if self.state.is_terminal() {
            return;
        }

        tracing::warn!(reason, "backend rejected session");
        self.bridge.notify(BridgeMessage::SessionStartRejected {
            reason: reason.to_string(),
        });
        self.transition(SessionState::SessionEnded, None);
    }

    fn note_merchant_arrival(&mut self, merchant_id: &str) {
        // The grace deadline doubles as the "arrival not yet counted" flag.
        if self.grace_period_deadline.is_none() {
            return;
        }

        tracing::info!(merchant_id, "merchant arrival verified");
        self.grace_period_deadline = None;
        let event = self.build_event(
            EventName::MerchantArrived,
            self.state,
            Some(json!({ "merchantId": merchant_id })),
        );
        self.queue_billing_event(event);
        self.persist();
        self.flush_pending();
    }

    fn check_deadlines(&mut self) {
        if !matches!(
            self.state,
            SessionState::InTransit | SessionState::SessionActive
        ) {
            return;
        }

        let now = self.clock.now();
        if let Some(hard) = self.hard_timeout_deadline
            && now >= hard
        {
            self.terminate("hard_timeout");
        } else if let Some(grace) = self.grace_period_deadline
            && now >= grace
        {
            self.terminate("grace_period_expired");
        }
    }

    fn terminate(&mut self, reason: &str) {
        tracing::warn!(reason, state = self.state.as_str(), "terminating session");
        let event = self.build_event(
            EventName::SessionTerminated,
            SessionState::SessionEnded,
            Some(json!({ "reason": reason })),
        );
        self.transition(SessionState::SessionEnded, Some(event));
    }

    fn build_event(
        &self,
        name: EventName,
        app_state: SessionState,
        metadata: Option<serde_json::Value>,
    ) -> PendingEvent {
        PendingEvent::build(
            name,
            self.clock.now(),
            &self.config.source,
            app_state.as_str(),
            self.active_session.as_ref().map(|s| s.session_id.as_str()),
            self.charger.as_ref().map(|c| c.id.as_str()),
            metadata,
        )
    }

    fn queue_billing_event(&mut self, event: PendingEvent) {
        if let Some(superseded) = self.pending_event.replace(event) {
            tracing::warn!(
                event_id = %superseded.event_id,
                event = %superseded.event_name,
                "undelivered pending event superseded"
            );
        }
    }

    fn transition(&mut self, next: SessionState, billing: Option<PendingEvent>) {
        let previous = self.state;
        self.state = next;

        if next.is_terminal() {
            self.geofences.clear_all();
            self.dwell.reset();
        }

        let has_billing = billing.is_some();
        if let Some(event) = billing {
            self.queue_billing_event(event);
        }

        // Persist before the bridge hears about it, so no observer ever sees
        // UI state without a matching durable snapshot.
        self.persist();
        self.bridge
            .notify(BridgeMessage::SessionStateChanged { state: next });
        tracing::info!(from = previous.as_str(), to = next.as_str(), "session state changed");

        if has_billing {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        let Some(event) = self.pending_event.clone() else {
            return;
        };

        match self.events.emit(&event) {
            EmissionOutcome::Delivered => {
                self.pending_event = None;
                self.persist();
            }
            EmissionOutcome::AuthRequired => {
                // Keep the event for retry after re-authentication.
                self.bridge.notify(BridgeMessage::AuthRequired);
            }
            EmissionOutcome::Failed(reason) => {
                self.bridge.notify(BridgeMessage::EventEmissionFailed {
                    event: event.event_name.clone(),
                    reason,
                });
            }
        }
    }

    fn persist(&mut self) {
        let snapshot = SessionSnapshot {
            state: self.state,
            targeted_charger: self.charger.clone(),
            merchant_target: self.merchant.clone(),
            active_session: self.active_session.clone(),
            grace_period_deadline: self.grace_period_deadline,
            hard_timeout_deadline: self.hard_timeout_deadline,
            saved_at: self.clock.now(),
            pending_event: self.pending_event.clone(),
        };

        // Losing one snapshot write is better than stalling a mid-charge
        // session; the engine proceeds in memory.
        if let Err(error) = self.store.save(&snapshot) {
            tracing::error!(error = %error, "snapshot persist failed; continuing in memory");
        }
    }
}
