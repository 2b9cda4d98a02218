//! Points to level conversion.

/// System-wide points needed per level. Not configurable per fundraiser.
pub const POINTS_PER_LEVEL: u64 = 1000;

/// Number of whole levels contained in `points`.
pub const fn level_for(points: u64) -> u64 {
    points / POINTS_PER_LEVEL
}

/// Points still needed to reach the next level.
pub const fn points_to_next_level(points: u64) -> u64 {
    POINTS_PER_LEVEL - points % POINTS_PER_LEVEL
}
