//! Conflict resolution engine: mediates 409s handed off by the write
//! replay queue between keep-mine, use-theirs, merge, and force-save.

mod engine;
mod merge;
mod model;

pub use engine::{
    BodyFieldForceSave, ConflictError, ConflictEvent, ConflictHandoffAsync, ConflictResolutionEngine,
    ForceSaveStrategy, ResolutionKind, CONFLICT_TIMEOUT_MS, MAX_REPEAT_TIMEOUTS,
};
pub use merge::{MergeOutcome, MergeStrategy, OrderedNodeListMerge};
pub use model::{ConflictRecord, ConflictStatus, Resolution};
