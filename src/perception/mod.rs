pub mod history;
pub mod tracker;
pub mod zones;

pub use history::FlowHistory;
pub use tracker::{FlowTracker, TrackedFlow};
pub use zones::{extract_zones, ProbeReading, ZoneFlow};
