//! Control events emitted by entity pools.

/// Emitted after any mutation of a control's entities.
///
/// `redraw` is false for metadata-only changes (headline) that leave the
/// button's appearance untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlChangedEvent {
    pub control_id: String,
    pub redraw: bool,
}
