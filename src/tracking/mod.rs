pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{TrackingSnapshot, TrackingSupervisor};
pub use state::{DisarmReason, TrackingState, TrackingStatus};
