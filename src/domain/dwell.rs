use crate::domain::models::TimestampMs;

/// Decides whether the device has stayed within `anchor_radius_m` of an
/// anchor point for at least `dwell_duration_ms` of contiguous samples.
#[derive(Debug, Clone)]
pub struct DwellDetector {
    anchor_radius_m: f64,
    dwell_duration_ms: i64,
    speed_threshold_mps: f64,
    window_started_at: Option<TimestampMs>,
    anchored: bool,
}

impl DwellDetector {
    pub fn new(anchor_radius_m: f64, dwell_duration_ms: i64, speed_threshold_mps: f64) -> Self {
        Self {
            anchor_radius_m,
            dwell_duration_ms,
            speed_threshold_mps,
            window_started_at: None,
            anchored: false,
        }
    }

    /// Feed one location sample. Both comparisons are inclusive: a sample at
    /// exactly `anchor_radius_m` counts as inside, a window spanning exactly
    /// `dwell_duration_ms` counts as anchored. A sample faster than
    /// `speed_threshold_mps` is dropped as noise without touching the window.
    pub fn record_sample(&mut self, timestamp: TimestampMs, distance_to_anchor: f64, speed: f64) {
        if speed > self.speed_threshold_mps {
            return;
        }

        if distance_to_anchor <= self.anchor_radius_m {
            let started = *self.window_started_at.get_or_insert(timestamp);
            if timestamp.0 - started.0 >= self.dwell_duration_ms {
                self.anchored = true;
            }
        } else {
            self.reset();
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn reset(&mut self) {
        self.window_started_at = None;
        self.anchored = false;
    }
}
