//! Overlay adapter capabilities: which optional host features are present.

/// A single capability an overlay host adapter may or may not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Transforms,
    Shortcuts,
    LayerToggle,
    Persistence,
    ResetView,
    ToggleSidebar,
}

const ALL: [Capability; 6] = [
    Capability::Transforms,
    Capability::Shortcuts,
    Capability::LayerToggle,
    Capability::Persistence,
    Capability::ResetView,
    Capability::ToggleSidebar,
];

/// A small bitset over `Capability`, cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn from_iter(caps: impl IntoIterator<Item = Capability>) -> Self {
        let mut set = Self::EMPTY;
        for cap in caps {
            set = set.with(cap);
        }
        set
    }

    pub fn with(self, cap: Capability) -> Self {
        CapabilitySet(self.0 | Self::bit(cap))
    }

    pub fn has(self, cap: Capability) -> bool {
        self.0 & Self::bit(cap) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        ALL.into_iter().filter(move |c| self.has(*c))
    }

    fn bit(cap: Capability) -> u8 {
        1 << (cap as u8)
    }
}

/// Returned by any capability-gated operation invoked against an adapter
/// that doesn't declare that capability. Never an error the caller needs to
/// propagate — per `spec.md` §7, this is a no-op plus a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("adapter does not support capability {0:?}")]
pub struct CapabilityAbsent(pub Capability);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_membership() {
        let set = CapabilitySet::from_iter([Capability::Transforms, Capability::ResetView]);
        assert!(set.has(Capability::Transforms));
        assert!(set.has(Capability::ResetView));
        assert!(!set.has(Capability::Shortcuts));
    }

    #[test]
    fn empty_set_has_nothing() {
        assert!(!CapabilitySet::EMPTY.has(Capability::Transforms));
    }
}
