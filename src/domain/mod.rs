pub mod dwell;
pub mod events;
pub mod geofence;
pub mod models;
