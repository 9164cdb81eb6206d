//! Selection history and effect-transition learning.
//!
//! Two anti-repetition mechanisms feed the selector: a timestamped history
//! of recent picks (cooldown and diversity penalties) and a first-order
//! transition matrix over effect ids that is seeded from curated pairings
//! and reinforced online from the picks actually made.

use crate::pipeline::EffectId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Maximum retained history entries.
pub const HISTORY_WINDOW: usize = 64;

/// Tail length inspected by the diversity taper.
pub const DIVERSITY_TAIL: usize = 6;

/// Number of trailing entries mined for transition reinforcement.
const OBSERVE_TAIL: usize = 8;

/// Online learning rate for transition reinforcement.
const LEARNING_RATE: f32 = 0.1;

/// Decay applied to sibling transitions when one is reinforced.
const SIBLING_DECAY: f32 = 0.01;

/// What a history entry refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryKey {
    /// An effect node pick
    Effect(EffectId),
    /// A preset pick
    Preset(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryEntry {
    key: HistoryKey,
    t_ms: f64,
}

/// Timestamped record of recent selection outcomes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionHistory {
    entries: VecDeque<HistoryEntry>,
}

impl SelectionHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pick, evicting the oldest entry past the window.
    pub fn push(&mut self, key: HistoryKey, t_ms: f64) {
        self.entries.push_back(HistoryEntry { key, t_ms });
        while self.entries.len() > HISTORY_WINDOW {
            self.entries.pop_front();
        }
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no picks have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Multiplicative penalty for re-picking `key` at time `now_ms`.
    ///
    /// A pick still inside the cooldown window is crushed to one fifth of
    /// its score. Independently, picks in the last [`DIVERSITY_TAIL`]
    /// entries are tapered by recency: the more recent the repeat, the
    /// harder the taper, scaled by the configured diversity pressure.
    pub fn penalty(&self, key: &HistoryKey, now_ms: f64, cool_ms: f64, diversity: f32) -> f32 {
        let mut factor = 1.0;
        if let Some(last) = self
            .entries
            .iter()
            .rev()
            .find(|entry| &entry.key == key)
        {
            if now_ms - last.t_ms < cool_ms {
                factor *= 0.2;
            }
        }
        let tail_len = self.entries.len().min(DIVERSITY_TAIL);
        let tail = self.entries.iter().rev().take(tail_len);
        // idx 0 is the most recent entry
        if let Some(idx) = tail
            .enumerate()
            .find(|(_, entry)| &entry.key == key)
            .map(|(idx, _)| idx)
        {
            factor *= 1.0 - diversity * (1.0 - idx as f32 / DIVERSITY_TAIL as f32);
        }
        factor.max(0.0)
    }

    /// Effect ids in the trailing reinforcement window, oldest first.
    fn effect_tail(&self) -> Vec<EffectId> {
        self.entries
            .iter()
            .rev()
            .take(OBSERVE_TAIL)
            .filter_map(|entry| match entry.key {
                HistoryKey::Effect(id) => Some(id),
                HistoryKey::Preset(_) => None,
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

/// First-order transition weights between effect ids.
///
/// Seeded with curated pairings that ring each pool and bridge between
/// pools, then adjusted online as real transitions are observed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionMatrix {
    weights: HashMap<EffectId, HashMap<EffectId, f32>>,
}

impl TransitionMatrix {
    /// Matrix pre-seeded with the curated transition set.
    pub fn seeded() -> Self {
        use EffectId::*;
        let mut m = Self::default();
        let seeds: [(EffectId, EffectId, f32); 16] = [
            // base ring
            (LumaSoftOverlay, SMix, 0.6),
            (SMix, OkLabLightness, 0.5),
            (OkLabLightness, LumaSoftOverlay, 0.5),
            // accent ring
            (BoundedDodge, DualCurve, 0.4),
            (DualCurve, SpecularGrad, 0.4),
            (SpecularGrad, StructureMix, 0.3),
            (StructureMix, SoftBurn, 0.3),
            (SoftBurn, BoundedDodge, 0.3),
            // decor ring
            (GrainMerge, EdgeTint, 0.4),
            (EdgeTint, TemporalTrail, 0.3),
            (TemporalTrail, BloomHL, 0.3),
            (BloomHL, GrainMerge, 0.3),
            // cross-pool bridges
            (LumaSoftOverlay, BoundedDodge, 0.2),
            (SMix, StructureMix, 0.2),
            (BoundedDodge, GrainMerge, 0.15),
            (StructureMix, EdgeTint, 0.15),
        ];
        for (from, to, w) in seeds {
            m.weights.entry(from).or_default().insert(to, w);
        }
        m
    }

    /// Learned bonus for moving from `from` to `to`, zero when unseen.
    pub fn bonus(&self, from: EffectId, to: EffectId) -> f32 {
        self.weights
            .get(&from)
            .and_then(|row| row.get(&to))
            .copied()
            .unwrap_or(0.0)
    }

    /// Strengthen one transition and slightly decay its siblings.
    pub fn reinforce(&mut self, from: EffectId, to: EffectId) {
        let row = self.weights.entry(from).or_default();
        for (sibling, w) in row.iter_mut() {
            if *sibling != to {
                *w *= 1.0 - SIBLING_DECAY;
            }
        }
        let w = row.entry(to).or_insert(0.0);
        *w += LEARNING_RATE * (1.0 - *w);
    }

    /// Mine the trailing effect picks of `history` for consecutive pairs
    /// and reinforce each one.
    pub fn observe(&mut self, history: &SelectionHistory) {
        let tail = history.effect_tail();
        for pair in tail.windows(2) {
            self.reinforce(pair[0], pair[1]);
        }
    }
}
