//! Host adapter contract: the overlay controller is host-agnostic, and
//! every host-specific behaviour (transforms, shortcuts, layers, camera
//! reset, sidebar) is reached through this trait and gated by
//! `capabilities()`.

use super::capability::{CapabilityAbsent, Capability, CapabilitySet};
use super::transform::Transform;
use tokio::sync::watch;

/// A capability-introspecting host collaborator. Required methods are
/// always present; optional ones default to reporting the capability
/// absent so callers that skip the `capabilities()` check still get a
/// well-defined (non-panicking) result.
pub trait OverlayAdapter: Send + Sync {
    fn capabilities(&self) -> CapabilitySet;

    /// A coalescing stream of transform updates; the controller only ever
    /// keeps the latest value.
    fn subscribe_transforms(&self) -> watch::Receiver<Transform>;

    fn set_active_layer(&self, _layer: &str) -> Result<(), CapabilityAbsent> {
        Err(CapabilityAbsent(Capability::LayerToggle))
    }

    fn register_shortcut(&self, _binding: &str) -> Result<(), CapabilityAbsent> {
        Err(CapabilityAbsent(Capability::Shortcuts))
    }

    fn reset_view(&self) -> Result<(), CapabilityAbsent> {
        Err(CapabilityAbsent(Capability::ResetView))
    }

    fn toggle_sidebar(&self) -> Result<(), CapabilityAbsent> {
        Err(CapabilityAbsent(Capability::ToggleSidebar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TransformOnlyAdapter {
        tx: watch::Sender<Transform>,
    }

    impl OverlayAdapter for TransformOnlyAdapter {
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::from_iter([Capability::Transforms])
        }

        fn subscribe_transforms(&self) -> watch::Receiver<Transform> {
            self.tx.subscribe()
        }
    }

    #[test]
    fn unsupported_capability_reports_absent_not_panic() {
        let (tx, _rx) = watch::channel(Transform::IDENTITY);
        let adapter = TransformOnlyAdapter { tx };
        assert_eq!(adapter.reset_view(), Err(CapabilityAbsent(Capability::ResetView)));
        assert!(adapter.capabilities().has(Capability::Transforms));
    }
}
