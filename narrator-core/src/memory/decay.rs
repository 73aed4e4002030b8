//! Interest decay and lifetime extension.
//!
//! Interest fades with elapsed in-game hours and is boosted by each
//! interaction. Interest lengthens the lifetime of an entry; the in-game
//! expiry only ever moves forward.

use super::entry::EntryData;

pub const MAX_INTEREST: f64 = 3.0;
pub const DECAY_PER_HOUR: f64 = 0.012;
pub const MAX_DECAY_STEP: f64 = 0.45;
pub const MIN_TTL_HOURS: f64 = 24.0;
pub const MAX_TTL_BOOST: f64 = 2.2;
pub const TTL_INTEREST_FACTOR: f64 = 0.9;

fn elapsed_hours(data: &EntryData, now_game_min: i64) -> f64 {
    (now_game_min - data.decayed_at_game_min).max(0) as f64 / 60.0
}

/// Interest after `elapsed_hours` without interaction.
pub fn decayed_interest(previous: f64, elapsed_hours: f64) -> f64 {
    let loss = (elapsed_hours.max(0.0) * DECAY_PER_HOUR).min(MAX_DECAY_STEP);
    (previous - loss).clamp(0.0, MAX_INTEREST)
}

/// Interest the entry would have now, without modifying it.
pub fn effective_interest(data: &EntryData, now_game_min: i64) -> f64 {
    decayed_interest(data.interest_score, elapsed_hours(data, now_game_min))
}

/// Lifetime in hours for a given interest.
pub fn ttl_hours(base_ttl_hours: f64, interest: f64) -> f64 {
    let boost = (interest * TTL_INTEREST_FACTOR).min(MAX_TTL_BOOST);
    (base_ttl_hours * (1.0 + boost)).max(MIN_TTL_HOURS)
}

/// Record one interaction at `now_game_min` with the given weight.
pub fn touch(data: &mut EntryData, weight: f64, now_game_min: i64) {
    let now_game_min = now_game_min.max(data.decayed_at_game_min);
    let interest =
        (effective_interest(data, now_game_min) + weight.max(0.0)).clamp(0.0, MAX_INTEREST);
    let ttl = ttl_hours(data.ttl_game_hours, interest);
    let candidate = now_game_min + (ttl * 60.0).round() as i64;

    data.interest_score = interest;
    data.interaction_weight = weight.max(0.0);
    data.interaction_count = data.interaction_count.saturating_add(1);
    data.last_seen_at_game_min = now_game_min;
    data.decayed_at_game_min = now_game_min;
    data.expires_at_game_min = data.expires_at_game_min.max(candidate);
}

/// Passive decay applied by store sweeps. Expiry is left alone.
pub fn decay_passively(data: &mut EntryData, now_game_min: i64) {
    if now_game_min <= data.decayed_at_game_min {
        return;
    }
    data.interest_score = effective_interest(data, now_game_min);
    data.decayed_at_game_min = now_game_min;
}
