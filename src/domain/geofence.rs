use thiserror::Error;

use crate::domain::models::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofenceTransition {
    Enter,
    Exit,
}

impl GeofenceTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceTransition::Enter => "enter",
            GeofenceTransition::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredRegion {
    pub id: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub notify_on_exit: bool,
}

/// A transition confirmed to belong to a currently-monitored region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionEvent {
    pub region_id: String,
    pub transition: GeofenceTransition,
}

#[derive(Debug, Error)]
pub enum RegionMonitorError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("platform region limit reached")]
    RegionLimit,
    #[error("region registration failed: {0}")]
    Platform(String),
}

/// Seam over the platform geofencing service. Registration may fail; the
/// manager absorbs and logs those failures.
pub trait RegionMonitor {
    fn start_monitoring(&mut self, region: &MonitoredRegion) -> Result<(), RegionMonitorError>;
    fn stop_monitoring(&mut self, region_id: &str) -> Result<(), RegionMonitorError>;
}

/// Bounded set of monitored circular regions. The platform ceiling is tiny
/// (two regions on the target devices), so adding beyond `max_regions`
/// evicts the oldest-inserted region. Insertion order lives in the `Vec`
/// itself, never in a map's iteration order.
pub struct GeofenceManager<M> {
    monitor: M,
    max_regions: usize,
    regions: Vec<MonitoredRegion>,
}

impl<M: RegionMonitor> GeofenceManager<M> {
    pub fn new(monitor: M, max_regions: usize) -> Self {
        Self {
            monitor,
            max_regions: max_regions.max(1),
            regions: Vec::new(),
        }
    }

    pub fn add_target_geofence(
        &mut self,
        id: &str,
        center: GeoPoint,
        radius_m: f64,
        notify_on_exit: bool,
    ) {
        // Re-adding an id refreshes its insertion order.
        self.remove_geofence(id);

        while self.regions.len() >= self.max_regions {
            let oldest = self.regions.remove(0);
            if let Err(error) = self.monitor.stop_monitoring(&oldest.id) {
                tracing::warn!(region_id = %oldest.id, error = %error, "failed to stop evicted region");
            }
            tracing::info!(region_id = %oldest.id, "evicted oldest monitored region");
        }

        let region = MonitoredRegion {
            id: id.to_string(),
            center,
            radius_m,
            notify_on_exit,
        };

        match self.monitor.start_monitoring(&region) {
            Ok(()) => self.regions.push(region),
            Err(error) => {
                tracing::warn!(region_id = %id, error = %error, "region registration failed; region unmonitored");
            }
        }
    }

    pub fn remove_geofence(&mut self, id: &str) {
        if let Some(index) = self.regions.iter().position(|r| r.id == id) {
            self.regions.remove(index);
            if let Err(error) = self.monitor.stop_monitoring(id) {
                tracing::warn!(region_id = %id, error = %error, "failed to stop monitored region");
            }
        }
    }

    pub fn clear_all(&mut self) {
        for region in self.regions.drain(..) {
            if let Err(error) = self.monitor.stop_monitoring(&region.id) {
                tracing::warn!(region_id = %region.id, error = %error, "failed to stop monitored region");
            }
        }
    }

    /// Filter a raw platform callback down to transitions for regions we
    /// actually track. Exit callbacks for regions registered without exit
    /// notification are dropped too.
    pub fn transition(&self, id: &str, transition: GeofenceTransition) -> Option<RegionEvent> {
        let region = self.regions.iter().find(|r| r.id == id)?;
        if transition == GeofenceTransition::Exit && !region.notify_on_exit {
            return None;
        }
        Some(RegionEvent {
            region_id: region.id.clone(),
            transition,
        })
    }

    pub fn is_monitored(&self, id: &str) -> bool {
        self.regions.iter().any(|r| r.id == id)
    }

    /// Region ids in insertion order, oldest first.
    pub fn monitored_ids(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.id.clone()).collect()
    }
}
