//! Engine-wide constants that participate in fingerprint calculation.
//!
//! A change here invalidates every previously-computed fingerprint even if
//! the graph and inputs are unchanged — that's the point.

/// Logical engine version, folded into every step fingerprint so a change in
/// execution semantics is visible in replayed history.
pub const ENGINE_VERSION: &str = "dag-core.1";

/// Maximum depth walked when resolving a BlockDefinition's `parent_block_id`
/// chain during inheritance resolution.
pub const MAX_INHERITANCE_DEPTH: usize = 32;

/// Default safety bound for `while` groups absent an explicit
/// `max_iterations`.
pub const DEFAULT_WHILE_MAX_ITERATIONS: u32 = 100;

/// Default safety bound for `agent` groups absent an explicit
/// `max_iterations`.
pub const DEFAULT_AGENT_MAX_ITERATIONS: u32 = 30;

/// Default memory window (messages) for `agent` groups.
pub const DEFAULT_AGENT_MEMORY_WINDOW: u32 = 20;
