//! Drive vector unification.
//!
//! Fuses the operator mood, the current audio features, and the playing
//! track's metadata into one 3-D drive vector (E/A/V). Every downstream
//! scoring function reads this vector; it is the single coupling point
//! between "how the listener feels" and "what the music is doing".

use crate::audio_features::AudioFeatures;
use serde::{Deserialize, Serialize};

/// Fallback BPM when the playback collaborator reports none.
pub const DEFAULT_BPM: f32 = 128.0;

/// Normalized BPM assumed when no track is playing.
const UNKNOWN_BPM_NORM: f32 = 0.65;

/// Emotional state supplied by the mood collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mood {
    /// Overall intensity, 0.0 - 1.0
    pub energy: f32,
    /// Pleasantness, -1.0 - 1.0
    pub valence: f32,
    /// Activation, 0.0 - 1.0
    pub arousal: f32,
}

impl Default for Mood {
    fn default() -> Self {
        Self {
            energy: 0.6,
            valence: 0.0,
            arousal: 0.5,
        }
    }
}

/// Coarse musical-structure phase of the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// Groove holding steady
    Steady,
    /// Tension rising toward a drop
    Build,
    /// Short transitional fill
    Fill,
    /// Peak release
    Drop,
    /// Stripped-back breakdown
    Break,
}

impl Segment {
    /// Additive energy contribution of this segment to the drive vector.
    pub fn energy_boost(self) -> f32 {
        match self {
            Segment::Build => 0.10,
            Segment::Drop => 0.20,
            Segment::Fill => 0.15,
            Segment::Break => -0.05,
            Segment::Steady => 0.0,
        }
    }
}

/// Now-playing metadata owned by the playback collaborator. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Stable track identifier, used to seed the selection RNG
    pub track_id: Option<String>,
    /// Tempo in beats per minute
    pub bpm: Option<f32>,
    /// Harmonic key in Camelot notation (`1A`..`12B`)
    pub key_camelot: Option<String>,
    /// Reported musical segment, overrides the beat-grid estimate
    pub segment: Option<Segment>,
    /// Wall-clock start time in ms
    pub started_at: Option<f64>,
}

/// Unified Energy/Arousal/Valence signal, recomputed every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriveVector {
    /// Energy, 0.0 - 1.0
    pub e: f32,
    /// Arousal, 0.0 - 1.0
    pub a: f32,
    /// Valence, -1.0 - 1.0
    pub v: f32,
}

/// Fuse mood, audio and track context into a drive vector.
///
/// Pure function. The blending constants are empirically tuned defaults
/// carried over from production; they are deliberately not re-derived.
pub fn unify(mood: &Mood, audio: &AudioFeatures, bpm: Option<f32>, segment: Segment) -> DriveVector {
    let bpm_norm = bpm
        .map(|b| (b / 180.0).clamp(0.0, 1.0))
        .unwrap_or(UNKNOWN_BPM_NORM);
    let seg_boost = segment.energy_boost();

    let e = (0.45 * mood.energy + 0.25 * bpm_norm + 0.20 * audio.rms + 0.10 * seg_boost)
        .clamp(0.0, 1.0);
    let a = (0.50 * mood.arousal + 0.30 * audio.flux + 0.20 * audio.crest).clamp(0.0, 1.0);
    let v = (mood.valence + 0.2 * (audio.presence - audio.low_mid)).clamp(-1.0, 1.0);

    DriveVector { e, a, v }
}
