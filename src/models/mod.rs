pub mod location;
pub mod permission;
pub mod session;

pub use location::{LocationBatch, LocationPayload, LocationSample};
pub use permission::{PermissionScope, PermissionState};
pub use session::{AuthEvent, Session};
