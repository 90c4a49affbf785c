//! Hard bounds on event cascades and external template lookups.

// Event cascade guards
pub const DEFAULT_EVENT_CASCADE_DEPTH: usize = 32;
pub const MAX_EVENT_CASCADE_DEPTH: usize = 256;

// External template guards
pub const DEFAULT_EXTERNAL_CANDIDATES: usize = 8;
pub const MAX_EXTERNAL_CANDIDATES: usize = 32;

pub fn clamp_usize(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_cascade_depth(value: usize) -> usize {
    clamp_usize(value, 1, MAX_EVENT_CASCADE_DEPTH)
}

pub fn clamp_candidates(value: usize) -> usize {
    clamp_usize(value, 1, MAX_EXTERNAL_CANDIDATES)
}
