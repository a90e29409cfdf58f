pub mod controller;
pub mod loop_worker;
pub mod provider;
pub mod simulated;

pub use controller::{ArmOutcome, LocationSampler};
pub use loop_worker::{forwarding_loop, ForwardingExit, ForwardingOptions, ForwardingTarget};
pub use provider::{Accuracy, ForegroundServiceNotice, LocationProvider, SamplerConfig};
pub use simulated::{SimulatedLocationProvider, SimulationSettings};
