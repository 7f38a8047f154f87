//! Popup registry entries and their persisted layout document.

use super::transform::Point;
use serde::{Deserialize, Serialize};

pub type PopupId = String;

/// A floating popup's current position, kept in both screen (authoritative)
/// and world (derived) coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PopupDescriptor {
    pub id: PopupId,
    pub parent_id: Option<PopupId>,
    pub folder_id: Option<String>,
    pub level: u32,
    pub height: Option<f64>,
    pub screen_position: Point,
    pub world_position: Point,
}

impl PopupDescriptor {
    /// A new popup with no adapter present has `world == screen`.
    pub fn new(id: impl Into<PopupId>, screen_position: Point) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            folder_id: None,
            level: 0,
            height: None,
            screen_position,
            world_position: screen_position,
        }
    }
}

/// On-wire form of a popup, saved and rehydrated by external persistence.
/// `overlay_position` is the current field name for the world position;
/// `canvas_position` is kept for documents written before the rename and is
/// accepted on load but never written by this crate going forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPopup {
    pub id: PopupId,
    pub parent_id: Option<PopupId>,
    pub folder_id: Option<String>,
    pub level: u32,
    pub height: Option<f64>,
    pub screen_position: Option<PersistedPoint>,
    pub overlay_position: Option<PersistedPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canvas_position: Option<PersistedPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersistedPoint {
    pub x: f64,
    pub y: f64,
}

impl From<Point> for PersistedPoint {
    fn from(p: Point) -> Self {
        PersistedPoint { x: p.x, y: p.y }
    }
}

impl From<PersistedPoint> for Point {
    fn from(p: PersistedPoint) -> Self {
        Point::new(p.x, p.y)
    }
}

/// Current layout document schema version. Bumped whenever the persisted
/// shape gains fields.
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLayout {
    pub schema_version: u32,
    pub popups: Vec<PersistedPopup>,
    pub revision: u64,
}

impl PopupDescriptor {
    pub fn to_persisted(&self) -> PersistedPopup {
        PersistedPopup {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            folder_id: self.folder_id.clone(),
            level: self.level,
            height: self.height,
            screen_position: Some(self.screen_position.into()),
            overlay_position: Some(self.world_position.into()),
            canvas_position: None,
        }
    }

    /// Rehydrate from a persisted document. `screen_position` is
    /// authoritative when present; `world_position` comes from
    /// `overlay_position` (falling back to the legacy `canvas_position`
    /// field). A `schema_version <= 1` document has neither new field, so
    /// whichever side is missing is backfilled from the other.
    pub fn from_persisted(persisted: PersistedPopup) -> Self {
        let world = persisted.overlay_position.or(persisted.canvas_position).map(Point::from);
        let screen = persisted.screen_position.map(Point::from);

        let screen_position = screen.or(world).unwrap_or(Point::new(0.0, 0.0));
        let world_position = world.or(screen).unwrap_or(Point::new(0.0, 0.0));

        Self {
            id: persisted.id,
            parent_id: persisted.parent_id,
            folder_id: persisted.folder_id,
            level: persisted.level,
            height: persisted.height,
            screen_position,
            world_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_popup_has_equal_screen_and_world() {
        let popup = PopupDescriptor::new("p1", Point::new(1.0, 2.0));
        assert_eq!(popup.screen_position, popup.world_position);
    }

    #[test]
    fn legacy_canvas_position_field_is_accepted_on_load() {
        let persisted = PersistedPopup {
            id: "p1".into(),
            parent_id: None,
            folder_id: None,
            level: 0,
            height: None,
            screen_position: None,
            overlay_position: None,
            canvas_position: Some(PersistedPoint { x: 5.0, y: 6.0 }),
        };
        let popup = PopupDescriptor::from_persisted(persisted);
        assert_eq!(popup.world_position, Point::new(5.0, 6.0));
        assert_eq!(popup.screen_position, Point::new(5.0, 6.0));
    }

    #[test]
    fn round_trip_preserves_position() {
        let popup = PopupDescriptor::new("p1", Point::new(3.0, 4.0));
        let persisted = popup.to_persisted();
        let restored = PopupDescriptor::from_persisted(persisted);
        assert_eq!(restored.world_position, popup.world_position);
        assert_eq!(restored.screen_position, popup.screen_position);
    }

    #[test]
    fn round_trip_preserves_distinct_screen_and_world_positions() {
        // After a non-identity transform, screen and world diverge; the
        // persisted form must round-trip both independently rather than
        // rederiving one from the other.
        let popup = PopupDescriptor {
            id: "p1".into(),
            parent_id: None,
            folder_id: None,
            level: 0,
            height: None,
            screen_position: Point::new(20.0, 10.0),
            world_position: Point::new(10.0, 5.0),
        };
        let persisted = popup.to_persisted();
        let restored = PopupDescriptor::from_persisted(persisted);
        assert_eq!(restored.screen_position, Point::new(20.0, 10.0));
        assert_eq!(restored.world_position, Point::new(10.0, 5.0));
    }

    #[test]
    fn missing_screen_position_backfills_from_world() {
        let persisted = PersistedPopup {
            id: "p1".into(),
            parent_id: None,
            folder_id: None,
            level: 0,
            height: None,
            screen_position: None,
            overlay_position: Some(PersistedPoint { x: 7.0, y: 8.0 }),
            canvas_position: None,
        };
        let popup = PopupDescriptor::from_persisted(persisted);
        assert_eq!(popup.screen_position, Point::new(7.0, 8.0));
        assert_eq!(popup.world_position, Point::new(7.0, 8.0));
    }
}
