//! Per-tick micro-modulation.
//!
//! Small, rate-limited reactions that keep an active pipeline alive
//! between rebuilds. Each rule watches one or two audio features and, when
//! its threshold trips and its cooldown has elapsed, writes a uniform or
//! nudges a node weight. Rules targeting absent nodes are silent no-ops.

use crate::audio_features::AudioFeatures;
use crate::pipeline::{EffectId, EffectPipeline, NodeCategory, UniformKey, UniformScope};
use crate::rng::EngineRng;
use std::collections::HashMap;
use tracing::trace;

/// Evaluates the micro-modulation rule set against each tick's features.
#[derive(Debug, Clone, Default)]
pub struct MicroModulator {
    last_fired: HashMap<&'static str, f64>,
}

impl MicroModulator {
    /// Fresh modulator with every cooldown expired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and arm a rule's cooldown in one step.
    fn fire(&mut self, name: &'static str, now_ms: f64, cooldown_ms: f64) -> bool {
        match self.last_fired.get(name) {
            Some(last) if now_ms - last < cooldown_ms => false,
            _ => {
                self.last_fired.insert(name, now_ms);
                trace!(rule = name, "micro rule fired");
                true
            }
        }
    }

    /// Run every rule in fixed order against the current features.
    pub fn apply(
        &mut self,
        now_ms: f64,
        features: &AudioFeatures,
        perf_high: bool,
        pipeline: &mut EffectPipeline,
        rng: &mut EngineRng,
    ) {
        let f = features;

        if f.sub > 0.35 && self.fire("sub_ripple", now_ms, 500.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::StructureMix),
                UniformKey::FlowRadius,
                0.6 + f.sub * 0.6,
            );
        }
        if f.bass > 0.4 && f.beat > 0.5 && self.fire("bass_dodge", now_ms, 350.0) {
            pipeline.nudge_weight(EffectId::BoundedDodge, 0.03 + f.bass * 0.03);
        }
        if f.low_mid > 0.5 && self.fire("low_mid_burn", now_ms, 1_200.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::SoftBurn),
                UniformKey::MaskGain,
                0.4 + f.low_mid * 0.4,
            );
        }
        if f.mid > 0.45 && self.fire("mid_lic", now_ms, 900.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::StructureMix),
                UniformKey::LicStrength,
                0.3 + f.mid * 0.5,
            );
        }
        if f.high_mid > 0.5 && f.crest > 0.35 && self.fire("attack_edge", now_ms, 500.0) {
            pipeline.nudge_weight(EffectId::EdgeTint, 0.02);
        }
        if f.presence > 0.45 && self.fire("presence_specular", now_ms, 1_200.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::SpecularGrad),
                UniformKey::LightPhase,
                rng.next_f32(),
            );
        }
        if f.brilliance > 0.5 && perf_high && self.fire("brill_bloom", now_ms, 700.0) {
            pipeline.nudge_weight(EffectId::BloomHL, 0.02);
        }
        if f.centroid > 0.72 && self.fire("centroid_brake", now_ms, 1_500.0) {
            pipeline.set_uniform(UniformScope::Global, UniformKey::BrightCap, 0.85);
        }
        if f.flux > 0.55 && perf_high && self.fire("flux_jitter", now_ms, 400.0) {
            pipeline.set_uniform(
                UniformScope::Category(NodeCategory::Decor),
                UniformKey::WeightJitter,
                0.01 + f.flux * 0.02,
            );
        }
        if f.crest > 0.5 && self.fire("crest_arc", now_ms, 600.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::DualCurve),
                UniformKey::VividGate,
                1.0,
            );
        }
        if f.beat > 0.6 && self.fire("beat_swap", now_ms, 350.0) {
            pipeline.set_uniform(
                UniformScope::Category(NodeCategory::Accent),
                UniformKey::Refresh,
                1.0,
            );
        }
        if f.silence && self.fire("silence_hold", now_ms, 2_000.0) {
            pipeline.set_uniform(UniformScope::Global, UniformKey::Calm, 1.0);
        }
        if f.air > 0.5 && self.fire("air_colder", now_ms, 900.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::EdgeTint),
                UniformKey::TintHueShift,
                -0.05,
            );
        }
        if f.bass > 0.55 && self.fire("bass_swirl", now_ms, 700.0) {
            pipeline.set_uniform(
                UniformScope::Flow,
                UniformKey::FlowAmp,
                0.03 + f.bass * 0.03,
            );
            pipeline.set_uniform(
                UniformScope::Flow,
                UniformKey::FlowScale,
                0.8 + f.bass * 1.0,
            );
        }
        if f.brilliance > 0.6 && self.fire("cell_crack", now_ms, 1_100.0) {
            pipeline.set_uniform(
                UniformScope::Texture,
                UniformKey::CellSharp,
                0.7 + f.brilliance * 0.3,
            );
        }
        if f.rms < 0.2 && self.fire("tex_ease", now_ms, 1_600.0) {
            pipeline.set_uniform(UniformScope::Texture, UniformKey::TexGain, 0.5);
        }
        if f.mid > 0.6 && self.fire("lightness_boost", now_ms, 800.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::OkLabLightness),
                UniformKey::LightnessBoost,
                0.05 + f.mid * 0.05,
            );
        }
        if f.crest > 0.55 && self.fire("struct_kick", now_ms, 900.0) {
            pipeline.set_uniform(
                UniformScope::Node(EffectId::StructureMix),
                UniformKey::EdgeGain,
                0.15 + f.crest * 0.25,
            );
        }
    }
}
