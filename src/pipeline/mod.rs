pub mod controller;
pub mod recorder;
pub mod telemetry;

pub use controller::ControlLoop;
pub use recorder::Recorder;
pub use telemetry::{retain_recent_logs, DecisionRecord, FlightLog};
