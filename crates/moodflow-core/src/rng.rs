//! Deterministic random source for the engine.
//!
//! All stochastic choices (roulette picks, TTL draws, light phases) go
//! through a single [`EngineRng`] owned by the engine, so a fixed seed and
//! a fixed input stream reproduce the exact same pipelines.

use crate::drive::TrackMetadata;
use rand::rngs::SmallRng;
use rand::{RngExt, SeedableRng};

/// Seeded random source shared by the selection and modulation stages.
#[derive(Debug, Clone)]
pub struct EngineRng {
    inner: SmallRng,
}

impl EngineRng {
    /// Build from an explicit seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
        }
    }

    /// Build from a wall-clock timestamp, for sessions with no track identity.
    pub fn from_clock(now_ms: f64) -> Self {
        Self::from_seed(now_ms.abs() as u64)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.inner.random::<f32>()
    }

    /// Uniform `u32`.
    pub fn next_u32(&mut self) -> u32 {
        self.inner.random::<u32>()
    }

    /// Uniform in `[lo, hi)`.
    pub fn range_f32(&mut self, lo: f32, hi: f32) -> f32 {
        if hi <= lo {
            return lo;
        }
        self.inner.random_range(lo..hi)
    }

    /// Roulette-wheel pick over non-negative weights.
    ///
    /// Returns `None` when the slice is empty or every weight is zero.
    pub fn pick_weighted<'a, T>(&mut self, candidates: &'a [(T, f32)]) -> Option<&'a T> {
        let total: f32 = candidates.iter().map(|(_, w)| w.max(0.0)).sum();
        if total <= 0.0 {
            return None;
        }
        let mut roll = self.next_f32() * total;
        for (item, w) in candidates {
            roll -= w.max(0.0);
            if roll <= 0.0 {
                return Some(item);
            }
        }
        candidates.last().map(|(item, _)| item)
    }

    /// Uniform pick from a slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.inner.random_range(0..items.len());
        items.get(idx)
    }
}

/// Derive the per-track seed.
///
/// Identity comes from the track id bytes and the rounded tempo, salted
/// from config. A session with no track id falls back to the clock so two
/// anonymous sessions do not replay each other.
pub fn seed_for_track(track: Option<&TrackMetadata>, seed_salt: u64, now_ms: f64) -> u64 {
    let Some(track) = track else {
        return now_ms.abs() as u64 ^ seed_salt;
    };
    let Some(id) = track.track_id.as_deref() else {
        return now_ms.abs() as u64 ^ seed_salt;
    };
    let byte_sum: u64 = id.bytes().map(u64::from).sum();
    let bpm_term = (track.bpm.unwrap_or(0.0) * 13.0) as i64 as u64;
    byte_sum
        .wrapping_add(bpm_term)
        .wrapping_add(seed_salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::Segment;

    fn track(id: &str, bpm: f32) -> TrackMetadata {
        TrackMetadata {
            track_id: Some(id.to_string()),
            bpm: Some(bpm),
            key_camelot: None,
            segment: Some(Segment::Steady),
            started_at: None,
        }
    }

    #[test]
    fn same_track_same_seed() {
        let a = track("club-night-07", 132.0);
        let b = track("club-night-07", 132.0);
        assert_eq!(
            seed_for_track(Some(&a), 114_514, 1.0),
            seed_for_track(Some(&b), 114_514, 99_999.0)
        );
    }

    #[test]
    fn different_tracks_diverge() {
        let a = track("track-a", 128.0);
        let b = track("track-b", 128.0);
        assert_ne!(
            seed_for_track(Some(&a), 114_514, 0.0),
            seed_for_track(Some(&b), 114_514, 0.0)
        );
    }

    #[test]
    fn anonymous_session_uses_clock() {
        assert_ne!(
            seed_for_track(None, 114_514, 1_000.0),
            seed_for_track(None, 114_514, 2_000.0)
        );
    }

    #[test]
    fn seeded_stream_is_reproducible() {
        let mut a = EngineRng::from_seed(42);
        let mut b = EngineRng::from_seed(42);
        for _ in 0..32 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn weighted_pick_skips_zero_weights() {
        let mut rng = EngineRng::from_seed(7);
        let candidates = [("never", 0.0f32), ("always", 1.0)];
        for _ in 0..64 {
            assert_eq!(rng.pick_weighted(&candidates), Some(&"always"));
        }
        let empty: [(&str, f32); 0] = [];
        assert_eq!(rng.pick_weighted(&empty), None);
    }

    #[test]
    fn range_degenerate_bounds() {
        let mut rng = EngineRng::from_seed(1);
        assert_eq!(rng.range_f32(3.0, 3.0), 3.0);
        let v = rng.range_f32(1.0, 2.0);
        assert!((1.0..2.0).contains(&v));
    }
}
