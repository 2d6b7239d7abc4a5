//! Well-known ids for entities, definitions and child groups.
//!
//! Avoid string typos across the tree code.
//! Usage: `entity.child_list(GROUP_CHILDREN)`

// === Connections ===
/// Connection id of built-in definitions. Only these may own children.
pub const CONNECTION_INTERNAL: &str = "internal";

// === Child groups ===
/// Boolean feedback children of logic operators
pub const GROUP_CHILDREN: &str = "children";
/// Advanced feedbacks gated by `logic_conditionalise_advanced`
pub const GROUP_ADVANCED_CHILDREN: &str = "advancedChildren";
/// Actions nested under internal action groups
pub const GROUP_ACTIONS: &str = "actions";

// === Internal feedback definitions ===
/// True when every child is true (false when there are none)
pub const LOGIC_AND: &str = "logic_and";
/// True when any child is true
pub const LOGIC_OR: &str = "logic_or";
/// True when exactly one child is true
pub const LOGIC_XOR: &str = "logic_xor";
/// Applies `advancedChildren` styles while the `children` conditions hold
pub const LOGIC_CONDITIONALISE_ADVANCED: &str = "logic_conditionalise_advanced";

// === Internal action definitions ===
/// Wait before continuing
pub const ACTION_WAIT: &str = "wait";
/// Run nested actions concurrently
pub const ACTION_GROUP: &str = "action_group";
/// Run nested actions only while conditions hold
pub const ACTION_IF: &str = "logic_if";

// === Top-level lists ===
/// Button/trigger feedbacks
pub const LIST_FEEDBACKS: &str = "feedbacks";
/// Trigger actions
pub const LIST_TRIGGER_ACTIONS: &str = "trigger_actions";

// === Step action sets ===
pub const SET_DOWN: &str = "down";
pub const SET_UP: &str = "up";
pub const SET_ROTATE_LEFT: &str = "rotate_left";
pub const SET_ROTATE_RIGHT: &str = "rotate_right";

/// Action sets every button step carries.
pub const STEP_ACTION_SETS: [&str; 4] = [SET_DOWN, SET_UP, SET_ROTATE_LEFT, SET_ROTATE_RIGHT];

// === Learn ===
/// Learn timeout used when neither the definition nor settings give one (ms)
pub const DEFAULT_LEARN_TIMEOUT_MS: u64 = 5000;
