//! Floating overlay controller: host-agnostic popup registry and transform
//! reconciliation.

use super::adapter::OverlayAdapter;
use super::capability::{Capability, CapabilityAbsent};
use super::popup::{PopupDescriptor, PopupId};
use super::transform::Transform;
use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Beyond this many pixels of drift between the last known screen position
/// and the transform-predicted one, screen wins and world is recomputed.
pub const DRIFT_TOLERANCE_PX: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    AdapterRegistered,
    AdapterUnregistered,
    PopupRegistered { id: PopupId },
    PopupUnregistered { id: PopupId },
    TransformChanged,
    DriftCorrected { id: PopupId, distance: f64 },
    CapabilityDenied { capability: Capability },
}

struct ControllerInner {
    adapter: ArcSwapOption<dyn OverlayAdapter>,
    transform: ArcSwap<Transform>,
    popups: DashMap<PopupId, PopupDescriptor>,
    watcher_cancel: std::sync::Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<OverlayEvent>,
    drift_tolerance_px: f64,
}

/// Host-agnostic popup state and coordinate reconciliation, independent of
/// whatever canvas/camera the host happens to run.
#[derive(Clone)]
pub struct OverlayController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for OverlayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayController").finish_non_exhaustive()
    }
}

impl Default for OverlayController {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayController {
    pub fn new() -> Self {
        Self::with_drift_tolerance(DRIFT_TOLERANCE_PX)
    }

    /// Same as [`Self::new`] but with a host-chosen drift tolerance instead
    /// of the crate default, per [`crate::config::OverlayConfig`].
    pub fn with_drift_tolerance(drift_tolerance_px: f64) -> Self {
        let (tx, _rx) = broadcast::channel(128);
        Self {
            inner: Arc::new(ControllerInner {
                adapter: ArcSwapOption::from(None),
                transform: ArcSwap::from_pointee(Transform::IDENTITY),
                popups: DashMap::new(),
                watcher_cancel: std::sync::Mutex::new(None),
                events: tx,
                drift_tolerance_px,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.inner.events.subscribe()
    }

    pub fn get_transform(&self) -> Transform {
        *self.inner.transform.load_full()
    }

    /// Installs `adapter`, atomically replacing any prior one, and performs
    /// an initial transform read plus reconciliation.
    pub async fn register_adapter(&self, adapter: Arc<dyn OverlayAdapter>) {
        self.cancel_watcher();

        let mut rx = adapter.subscribe_transforms();
        let initial = *rx.borrow();
        self.inner.adapter.store(Some(adapter));
        self.apply_transform(initial);

        let cancel = CancellationToken::new();
        *self.inner.watcher_cancel.lock().expect("watcher_cancel mutex poisoned") = Some(cancel.clone());

        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let transform = *rx.borrow();
                        controller.apply_transform(transform);
                    }
                }
            }
        });

        let _ = self.inner.events.send(OverlayEvent::AdapterRegistered);
    }

    /// Reverts to the identity transform; popups keep their screen
    /// positions and their world positions become equal to screen.
    pub fn unregister_adapter(&self) {
        self.cancel_watcher();
        self.inner.adapter.store(None);
        self.inner.transform.store(Arc::new(Transform::IDENTITY));
        for mut popup in self.inner.popups.iter_mut() {
            popup.world_position = popup.screen_position;
        }
        let _ = self.inner.events.send(OverlayEvent::AdapterUnregistered);
    }

    fn cancel_watcher(&self) {
        if let Some(cancel) = self.inner.watcher_cancel.lock().expect("watcher_cancel mutex poisoned").take() {
            cancel.cancel();
        }
    }

    pub fn register_popup(&self, descriptor: PopupDescriptor) {
        let id = descriptor.id.clone();
        self.inner.popups.insert(id.clone(), descriptor);
        let _ = self.inner.events.send(OverlayEvent::PopupRegistered { id });
    }

    pub fn unregister_popup(&self, id: &str) {
        if self.inner.popups.remove(id).is_some() {
            let _ = self.inner.events.send(OverlayEvent::PopupUnregistered { id: id.to_string() });
        }
    }

    pub fn popup(&self, id: &str) -> Option<PopupDescriptor> {
        self.inner.popups.get(id).map(|e| e.clone())
    }

    /// Screen is authoritative: recompute world immediately via the inverse
    /// transform (identity if no adapter is registered).
    pub fn update_popup_position(&self, id: &str, screen_position: super::transform::Point) {
        let transform = self.get_transform();
        if let Some(mut popup) = self.inner.popups.get_mut(id) {
            popup.screen_position = screen_position;
            popup.world_position = transform.to_world(screen_position);
        }
    }

    /// Reconcile every popup against a new transform: snap screen to the
    /// transform-predicted position when within tolerance, otherwise treat
    /// screen as ground truth and recompute world.
    fn apply_transform(&self, transform: Transform) {
        self.inner.transform.store(Arc::new(transform));
        for mut popup in self.inner.popups.iter_mut() {
            let expected_screen = transform.to_screen(popup.world_position);
            let drift = popup.screen_position.distance_to(expected_screen);
            if drift <= self.inner.drift_tolerance_px {
                popup.screen_position = expected_screen;
            } else {
                popup.world_position = transform.to_world(popup.screen_position);
                let id = popup.id.clone();
                drop(popup);
                let _ = self.inner.events.send(OverlayEvent::DriftCorrected { id, distance: drift });
            }
        }
        let _ = self.inner.events.send(OverlayEvent::TransformChanged);
    }

    pub fn set_active_layer(&self, layer: &str) -> Result<(), CapabilityAbsent> {
        self.dispatch_capability_gated(Capability::LayerToggle, |a| a.set_active_layer(layer))
    }

    pub fn register_shortcut(&self, binding: &str) -> Result<(), CapabilityAbsent> {
        self.dispatch_capability_gated(Capability::Shortcuts, |a| a.register_shortcut(binding))
    }

    pub fn reset_view(&self) -> Result<(), CapabilityAbsent> {
        self.dispatch_capability_gated(Capability::ResetView, |a| a.reset_view())
    }

    pub fn toggle_sidebar(&self) -> Result<(), CapabilityAbsent> {
        self.dispatch_capability_gated(Capability::ToggleSidebar, |a| a.toggle_sidebar())
    }

    fn dispatch_capability_gated(
        &self,
        capability: Capability,
        call: impl FnOnce(&Arc<dyn OverlayAdapter>) -> Result<(), CapabilityAbsent>,
    ) -> Result<(), CapabilityAbsent> {
        let guard = self.inner.adapter.load();
        let Some(adapter) = guard.as_ref() else {
            let _ = self.inner.events.send(OverlayEvent::CapabilityDenied { capability });
            return Err(CapabilityAbsent(capability));
        };
        if !adapter.capabilities().has(capability) {
            let _ = self.inner.events.send(OverlayEvent::CapabilityDenied { capability });
            return Err(CapabilityAbsent(capability));
        }
        call(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::capability::CapabilitySet;
    use crate::overlay::transform::Point;
    use tokio::sync::watch;

    struct FixedAdapter {
        caps: CapabilitySet,
        tx: watch::Sender<Transform>,
    }

    impl OverlayAdapter for FixedAdapter {
        fn capabilities(&self) -> CapabilitySet {
            self.caps
        }

        fn subscribe_transforms(&self) -> watch::Receiver<Transform> {
            self.tx.subscribe()
        }

        fn reset_view(&self) -> Result<(), CapabilityAbsent> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_adapter_means_identity_transform() {
        let controller = OverlayController::new();
        assert_eq!(controller.get_transform(), Transform::IDENTITY);
    }

    #[tokio::test]
    async fn unregister_reverts_to_identity_and_keeps_screen() {
        let controller = OverlayController::new();
        let (tx, _rx) = watch::channel(Transform { tx: 10.0, ty: 0.0, s: 2.0 });
        let adapter = Arc::new(FixedAdapter { caps: CapabilitySet::from_iter([Capability::Transforms]), tx });
        controller.register_adapter(adapter).await;

        controller.register_popup(PopupDescriptor::new("p1", Point::new(5.0, 5.0)));
        controller.unregister_adapter();

        let popup = controller.popup("p1").unwrap();
        assert_eq!(controller.get_transform(), Transform::IDENTITY);
        assert_eq!(popup.world_position, popup.screen_position);
    }

    #[tokio::test]
    async fn update_popup_position_recomputes_world_via_inverse_transform() {
        let controller = OverlayController::new();
        let (tx, _rx) = watch::channel(Transform { tx: 0.0, ty: 0.0, s: 2.0 });
        let adapter = Arc::new(FixedAdapter { caps: CapabilitySet::EMPTY, tx });
        controller.register_adapter(adapter).await;

        controller.register_popup(PopupDescriptor::new("p1", Point::new(0.0, 0.0)));
        controller.update_popup_position("p1", Point::new(20.0, 10.0));

        let popup = controller.popup("p1").unwrap();
        assert!((popup.world_position.x - 10.0).abs() < 1e-9);
        assert!((popup.world_position.y - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reconciliation_keeps_drift_within_tolerance() {
        let controller = OverlayController::new();
        let (tx, _rx) = watch::channel(Transform::IDENTITY);
        let adapter = Arc::new(FixedAdapter { caps: CapabilitySet::EMPTY, tx: tx.clone() });
        controller.register_adapter(adapter).await;
        controller.register_popup(PopupDescriptor::new("p1", Point::new(100.0, 100.0)));

        tx.send(Transform { tx: 1.0, ty: 1.0, s: 1.0 }).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let popup = controller.popup("p1").unwrap();
        let expected = Transform { tx: 1.0, ty: 1.0, s: 1.0 }.to_screen(popup.world_position);
        assert!(popup.screen_position.distance_to(expected) <= DRIFT_TOLERANCE_PX);
    }

    #[test]
    fn capability_gated_call_without_adapter_is_denied() {
        let controller = OverlayController::new();
        assert_eq!(controller.reset_view(), Err(CapabilityAbsent(Capability::ResetView)));
    }
}
