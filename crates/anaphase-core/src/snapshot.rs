//! Source snapshot contract used to stamp trial records.

/// Source id stamped on debug runs instead of a real snapshot id.
pub const DEBUG_SOURCE_ID: &str = "0000000";

/// Version-control snapshot checker, an external collaborator.
///
/// Non-debug runs refuse to start against a dirty tree; the head id is
/// recorded on every trial row so results stay traceable to the exact
/// source that produced them.
pub trait SourceSnapshot {
    /// True when the source tree has uncommitted changes.
    fn is_dirty(&self) -> bool;

    /// Identifier of the current source snapshot.
    fn head_id(&self) -> String;
}

/// Always-clean snapshot stamping the debug sentinel. Used for debug runs
/// and tests where no repository is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugSnapshot;

impl SourceSnapshot for DebugSnapshot {
    fn is_dirty(&self) -> bool {
        false
    }

    fn head_id(&self) -> String {
        DEBUG_SOURCE_ID.to_string()
    }
}
