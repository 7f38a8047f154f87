//! Floating overlay controller: capability-introspecting popup registry
//! with dual screen/world coordinates, independent of whatever canvas or
//! camera the host happens to run.

mod adapter;
mod capability;
mod controller;
mod popup;
mod transform;

pub use adapter::OverlayAdapter;
pub use capability::{Capability, CapabilityAbsent, CapabilitySet};
pub use controller::{OverlayController, OverlayEvent, DRIFT_TOLERANCE_PX};
pub use popup::{
    PersistedLayout, PersistedPoint, PersistedPopup, PopupDescriptor, PopupId, SCHEMA_VERSION,
};
pub use transform::{Point, Transform};
