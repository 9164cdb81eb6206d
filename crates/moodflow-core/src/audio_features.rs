//! Audio feature extraction from a precomputed magnitude spectrum.
//!
//! The FFT itself is owned by the audio collaborator; this module reduces a
//! normalized magnitude spectrum to the named semantic bands and summary
//! statistics the rest of the engine scores against.

use serde::{Deserialize, Serialize};

/// RMS level below which the signal is treated as silence.
pub const SILENCE_RMS: f32 = 0.06;

/// Fixed band edges in Hz, lowest to highest.
const BAND_RANGES_HZ: [(f32, f32); 8] = [
    (20.0, 60.0),       // sub
    (60.0, 150.0),      // bass
    (150.0, 400.0),     // low mid
    (400.0, 1000.0),    // mid
    (1000.0, 2500.0),   // high mid
    (2500.0, 6000.0),   // presence
    (6000.0, 12000.0),  // brilliance
    (12000.0, 18000.0), // air
];

/// Semantic audio features for one tick.
///
/// Derived fresh from the spectrum every tick; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// 20-60 Hz band mean magnitude
    pub sub: f32,
    /// 60-150 Hz band mean magnitude
    pub bass: f32,
    /// 150-400 Hz band mean magnitude
    pub low_mid: f32,
    /// 400-1000 Hz band mean magnitude
    pub mid: f32,
    /// 1000-2500 Hz band mean magnitude
    pub high_mid: f32,
    /// 2500-6000 Hz band mean magnitude
    pub presence: f32,
    /// 6000-12000 Hz band mean magnitude
    pub brilliance: f32,
    /// 12000-18000 Hz band mean magnitude
    pub air: f32,
    /// Magnitude-weighted mean frequency normalized by Nyquist
    pub centroid: f32,
    /// Mean of the three highest bands, a cheap brightness-change proxy
    pub flux: f32,
    /// Peak band minus rms, clamped to [0, 1]
    pub crest: f32,
    /// Externally detected beat confidence (0.0 - 1.0)
    pub beat: f32,
    /// Perceptual loudness proxy (weighted band blend, not a true RMS)
    pub rms: f32,
    /// True when `rms` falls below [`SILENCE_RMS`]
    pub silence: bool,
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self {
            sub: 0.0,
            bass: 0.0,
            low_mid: 0.0,
            mid: 0.0,
            high_mid: 0.0,
            presence: 0.0,
            brilliance: 0.0,
            air: 0.0,
            centroid: 0.0,
            flux: 0.0,
            crest: 0.0,
            beat: 0.0,
            rms: 0.0,
            silence: true,
        }
    }
}

/// Compute semantic features from a normalized magnitude spectrum.
///
/// `spectrum` holds the positive-frequency magnitudes (half the FFT size),
/// each in `[0, 1]`. `beat_confidence` is passed through from the external
/// beat detector. An empty spectrum yields all-zero features rather than an
/// error; non-finite magnitudes are treated as zero so they cannot
/// contaminate the summary statistics.
pub fn compute_audio_features(
    spectrum: &[f32],
    sample_rate: f32,
    beat_confidence: f32,
) -> AudioFeatures {
    if spectrum.is_empty() || sample_rate <= 0.0 {
        return AudioFeatures::default();
    }

    let bin_hz = sample_rate / (spectrum.len() as f32 * 2.0);
    let mag = |i: usize| -> f32 {
        let m = spectrum[i];
        if m.is_finite() {
            m
        } else {
            0.0
        }
    };

    let band = |f0: f32, f1: f32| -> f32 {
        let i0 = ((f0 / bin_hz).floor() as usize).min(spectrum.len() - 1);
        let i1 = ((f1 / bin_hz).ceil() as usize).min(spectrum.len() - 1);
        let mut sum = 0.0f32;
        for i in i0..=i1 {
            sum += mag(i);
        }
        (sum / (i1 - i0 + 1).max(1) as f32).min(1.0)
    };

    let [sub, bass, low_mid, mid, high_mid, presence, brilliance, air] =
        BAND_RANGES_HZ.map(|(f0, f1)| band(f0, f1));

    let mut num = 0.0f32;
    let mut den = 0.0f32;
    for i in 0..spectrum.len() {
        let m = mag(i);
        num += m * (i as f32 * bin_hz);
        den += m;
    }
    let centroid_hz = if den > 1e-6 { num / den } else { 0.0 };
    let centroid = (centroid_hz / (sample_rate / 2.0)).min(1.0);

    // Perceptual loudness proxy: low/mid/presence blend, not a true RMS.
    let rms = ((sub * 0.5 + bass * 0.8 + mid * 0.7 + presence * 0.6) / 2.6).min(1.0);
    let peak = sub
        .max(bass)
        .max(mid)
        .max(high_mid)
        .max(presence)
        .max(brilliance)
        .max(air);
    let crest = (peak - rms).clamp(0.0, 1.0);
    let flux = ((presence + brilliance + air) / 3.0).min(1.0);
    let silence = rms < SILENCE_RMS;

    AudioFeatures {
        sub,
        bass,
        low_mid,
        mid,
        high_mid,
        presence,
        brilliance,
        air,
        centroid,
        flux,
        crest,
        beat: beat_confidence.clamp(0.0, 1.0),
        rms,
        silence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 44100.0;

    /// Build a spectrum with energy concentrated around a single frequency.
    fn tone_spectrum(bins: usize, freq_hz: f32, level: f32) -> Vec<f32> {
        let bin_hz = SAMPLE_RATE / (bins as f32 * 2.0);
        let center = (freq_hz / bin_hz) as usize;
        let mut spectrum = vec![0.0f32; bins];
        for i in center.saturating_sub(2)..=(center + 2).min(bins - 1) {
            spectrum[i] = level;
        }
        spectrum
    }

    #[test]
    fn empty_spectrum_yields_silence() {
        let features = compute_audio_features(&[], SAMPLE_RATE, 0.8);
        assert_eq!(features.rms, 0.0);
        assert_eq!(features.bass, 0.0);
        assert_eq!(features.centroid, 0.0);
        assert!(features.silence);
    }

    #[test]
    fn bass_tone_lands_in_bass_band() {
        let spectrum = tone_spectrum(1024, 100.0, 0.9);
        let features = compute_audio_features(&spectrum, SAMPLE_RATE, 0.0);
        assert!(
            features.bass > features.presence * 2.0,
            "bass {} should dominate presence {}",
            features.bass,
            features.presence
        );
        assert!(features.bass > features.air);
    }

    #[test]
    fn high_tone_raises_centroid() {
        let low = compute_audio_features(&tone_spectrum(1024, 100.0, 0.9), SAMPLE_RATE, 0.0);
        let high = compute_audio_features(&tone_spectrum(1024, 10000.0, 0.9), SAMPLE_RATE, 0.0);
        assert!(high.centroid > low.centroid);
        assert!(high.centroid <= 1.0);
    }

    #[test]
    fn rms_is_weighted_band_blend() {
        let spectrum = vec![0.5f32; 1024];
        let features = compute_audio_features(&spectrum, SAMPLE_RATE, 0.0);
        // All bands sit at 0.5, so the blend collapses to 0.5 * 2.6 / 2.6.
        assert!((features.rms - 0.5).abs() < 1e-3, "rms was {}", features.rms);
        assert!(!features.silence);
    }

    #[test]
    fn flux_tracks_upper_bands() {
        let quiet = compute_audio_features(&tone_spectrum(1024, 100.0, 0.9), SAMPLE_RATE, 0.0);
        let bright = compute_audio_features(&tone_spectrum(1024, 9000.0, 0.9), SAMPLE_RATE, 0.0);
        assert!(bright.flux > quiet.flux);
    }

    #[test]
    fn non_finite_magnitudes_are_ignored() {
        let mut spectrum = vec![0.0f32; 512];
        spectrum[10] = f32::NAN;
        spectrum[11] = f32::INFINITY;
        let features = compute_audio_features(&spectrum, SAMPLE_RATE, 0.0);
        assert!(features.rms.is_finite());
        assert!(features.centroid.is_finite());
        assert_eq!(features.rms, 0.0);
        assert!(features.silence);
    }

    #[test]
    fn beat_confidence_passes_through_clamped() {
        let spectrum = vec![0.1f32; 256];
        let features = compute_audio_features(&spectrum, SAMPLE_RATE, 1.7);
        assert_eq!(features.beat, 1.0);
    }
}
