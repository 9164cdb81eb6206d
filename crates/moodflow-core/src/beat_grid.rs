//! Beat/bar/phrase position tracking.
//!
//! A coarse step sequencer that keeps a notion of "where in the phrase we
//! are" even when the playback collaborator reports no segment. Advancing is
//! driven by beat confidence with a wall-clock fallback so motion never
//! stalls on a silent or absent beat detector.

use crate::drive::Segment;
use serde::{Deserialize, Serialize};

/// Beat confidence above which a step advance is triggered.
pub const BEAT_ADVANCE_THRESHOLD: f32 = 0.6;

/// Wall-clock fallback: fire on roughly every 120 ms window.
const FALLBACK_PERIOD_MS: f64 = 120.0;
const FALLBACK_WINDOW_MS: f64 = 16.0;

/// Position within the beat grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// Completed bars since start
    pub bar: u32,
    /// Step within the current bar, `0..steps`
    pub step: u32,
    /// Steps per bar (16 or 32)
    pub steps: u32,
    /// Bar position within the current phrase, `0..phrase_bars`
    pub phase_in_phrase: u32,
    /// Bars per phrase
    pub phrase_bars: u32,
}

impl Default for StepState {
    fn default() -> Self {
        Self::new(16)
    }
}

impl StepState {
    /// Create a fresh grid with the given step resolution.
    pub fn new(steps: u32) -> Self {
        Self {
            bar: 0,
            step: 0,
            steps: steps.max(1),
            phase_in_phrase: 0,
            phrase_bars: 16,
        }
    }

    /// Advance one step, wrapping into the next bar as needed.
    pub fn advance(&mut self) {
        self.step = (self.step + 1) % self.steps;
        if self.step == 0 {
            self.bar += 1;
        }
        self.phase_in_phrase = self.bar % self.phrase_bars;
    }

    /// Derive a musical segment from the phrase position.
    pub fn segment(&self) -> Segment {
        if self.phase_in_phrase == 0 && self.step == 0 {
            Segment::Drop
        } else if self.phase_in_phrase == self.phrase_bars - 1 {
            Segment::Fill
        } else if self.phase_in_phrase >= self.phrase_bars.saturating_sub(2) {
            Segment::Build
        } else {
            Segment::Steady
        }
    }

    /// Whether this tick should advance the grid.
    pub fn should_advance(beat_confidence: f32, now_ms: f64) -> bool {
        beat_confidence > BEAT_ADVANCE_THRESHOLD
            || now_ms.rem_euclid(FALLBACK_PERIOD_MS) < FALLBACK_WINDOW_MS
    }
}
