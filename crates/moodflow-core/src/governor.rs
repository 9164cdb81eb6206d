//! Performance governor.
//!
//! Classifies the recent frame-time average into a tier and clamps the
//! pipeline to that tier's budget. Applying the governor twice with the
//! same tier must leave the pipeline unchanged, since it runs every tick
//! on an already-governed pipeline.

use crate::pipeline::{EffectPipeline, FlowField, NodeCategory, TextureAlgo, UniformKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

const EPSILON: f32 = 1e-6;

/// Performance tier, ordered worst to best.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PerfTier {
    /// Struggling, strip everything optional
    Low,
    /// Some headroom
    Medium,
    /// Full budget
    High,
}

/// Rolling frame-time observation fed to the governor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    /// Average frame duration over the recent window, in milliseconds
    pub avg_frame_ms: f32,
}

/// Tier thresholds and per-tier budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Minimum fps for the high tier
    pub fps_high: f32,
    /// Minimum fps for the medium tier
    pub fps_medium: f32,
    /// Node-count cap per tier, indexed `[high, medium, low]`
    pub max_nodes: [usize; 3],
    /// Total-weight cap per tier, indexed `[high, medium, low]`
    pub max_weight: [f32; 3],
    /// Per-node decor weight ceiling on the low tier
    pub decor_cap_low: f32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            fps_high: 55.0,
            fps_medium: 48.0,
            max_nodes: [3, 2, 1],
            max_weight: [0.35, 0.28, 0.20],
            decor_cap_low: 0.06,
        }
    }
}

impl GovernorConfig {
    fn budget_index(tier: PerfTier) -> usize {
        match tier {
            PerfTier::High => 0,
            PerfTier::Medium => 1,
            PerfTier::Low => 2,
        }
    }

    /// Node-count cap for a tier.
    pub fn node_cap(&self, tier: PerfTier) -> usize {
        self.max_nodes[Self::budget_index(tier)]
    }

    /// Total-weight cap for a tier.
    pub fn weight_cap(&self, tier: PerfTier) -> f32 {
        self.max_weight[Self::budget_index(tier)]
    }
}

/// Classify a frame-time average into a tier.
pub fn tier_for(sample: PerfSample, cfg: &GovernorConfig) -> PerfTier {
    if sample.avg_frame_ms <= 0.0 {
        return PerfTier::High;
    }
    let fps = 1000.0 / sample.avg_frame_ms;
    if fps >= cfg.fps_high {
        PerfTier::High
    } else if fps >= cfg.fps_medium {
        PerfTier::Medium
    } else {
        PerfTier::Low
    }
}

/// Clamp `pipeline` to the budget of `tier`.
///
/// Disabled effects are dropped, the node count is cut keeping the
/// highest-priority categories, total weight is rescaled under the cap,
/// and on the low tier decor is squeezed and quality knobs simplified.
///
/// `weight_cap_override` raises the high-tier weight cap for ticks where
/// the selector was allowed a wider budget (drop sections). It never
/// loosens the medium or low tiers, which are throttling for frame time.
pub fn apply(
    pipeline: &mut EffectPipeline,
    tier: PerfTier,
    cfg: &GovernorConfig,
    weight_cap_override: Option<f32>,
) {
    let before = pipeline.nodes.len();
    pipeline.nodes.retain(|n| tier >= n.id.required_tier());

    let cap = cfg.node_cap(tier);
    if pipeline.nodes.len() > cap {
        pipeline.nodes.sort_by(|a, b| {
            b.category
                .priority()
                .cmp(&a.category.priority())
                .then(b.weight.total_cmp(&a.weight))
        });
        pipeline.nodes.truncate(cap);
    }

    let total = pipeline.total_weight();
    let mut weight_cap = cfg.weight_cap(tier);
    if tier == PerfTier::High {
        if let Some(cap) = weight_cap_override {
            weight_cap = weight_cap.max(cap);
        }
    }
    if total > weight_cap + EPSILON {
        let scale = weight_cap / total;
        for node in &mut pipeline.nodes {
            node.weight *= scale;
        }
    }

    if tier == PerfTier::Low {
        for node in &mut pipeline.nodes {
            if node.category == NodeCategory::Decor && node.weight > cfg.decor_cap_low {
                node.weight = cfg.decor_cap_low;
            }
            if let Some(iters) = node.uniforms.get_mut(&UniformKey::Iterations) {
                *iters = iters.min(4.0);
            }
            node.uniforms.insert(UniformKey::Quality, 0.5);
        }
        if let Some(extras) = pipeline.extras.as_mut() {
            if let FlowField::DomainWarp { warp_iter, .. } = &mut extras.flow {
                *warp_iter = (*warp_iter).min(2);
            }
            if let TextureAlgo::Fbm { octaves, .. } = &mut extras.texture {
                *octaves = (*octaves).min(4);
            }
        }
    }

    if pipeline.nodes.len() != before {
        debug!(
            tier = ?tier,
            dropped = before - pipeline.nodes.len(),
            remaining = pipeline.nodes.len(),
            "governor trimmed pipeline"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{EffectId, EffectNode, Extras, PatternAlgo};

    fn full_pipeline() -> EffectPipeline {
        EffectPipeline {
            nodes: vec![
                EffectNode::new(EffectId::SMix, 0.12),
                EffectNode::new(EffectId::DualCurve, 0.14),
                EffectNode::new(EffectId::BloomHL, 0.08),
            ],
            ttl_ms: 30_000,
            preset_id: None,
            extras: Some(Extras {
                flow: FlowField::DomainWarp {
                    warp_amp: 0.02,
                    warp_iter: 3,
                },
                texture: TextureAlgo::Fbm {
                    scale: 2.5,
                    octaves: 6,
                    gain: 0.55,
                },
                pattern: PatternAlgo::Wfc { seed: 1 },
            }),
        }
    }

    #[test]
    fn tier_thresholds() {
        let cfg = GovernorConfig::default();
        // 16ms -> 62.5 fps
        assert_eq!(tier_for(PerfSample { avg_frame_ms: 16.0 }, &cfg), PerfTier::High);
        // 20ms -> 50 fps
        assert_eq!(tier_for(PerfSample { avg_frame_ms: 20.0 }, &cfg), PerfTier::Medium);
        // 25ms -> 40 fps
        assert_eq!(tier_for(PerfSample { avg_frame_ms: 25.0 }, &cfg), PerfTier::Low);
        assert_eq!(tier_for(PerfSample { avg_frame_ms: 0.0 }, &cfg), PerfTier::High);
    }

    #[test]
    fn high_tier_keeps_everything_under_budget() {
        let cfg = GovernorConfig::default();
        let mut p = full_pipeline();
        apply(&mut p, PerfTier::High, &cfg, None);
        assert_eq!(p.nodes.len(), 3);
        assert!(p.total_weight() <= cfg.weight_cap(PerfTier::High) + 1e-5);
    }

    #[test]
    fn medium_tier_drops_high_only_effects() {
        let cfg = GovernorConfig::default();
        let mut p = full_pipeline();
        apply(&mut p, PerfTier::Medium, &cfg, None);
        assert!(!p.has_node(EffectId::BloomHL));
        assert!(p.nodes.len() <= 2);
    }

    #[test]
    fn low_tier_keeps_single_highest_priority_node() {
        let cfg = GovernorConfig::default();
        let mut p = full_pipeline();
        apply(&mut p, PerfTier::Low, &cfg, None);
        assert_eq!(p.nodes.len(), 1);
        // base outranks accent regardless of weight
        assert_eq!(p.nodes[0].id, EffectId::SMix);
        assert_eq!(p.nodes[0].uniforms[&UniformKey::Quality], 0.5);
    }

    #[test]
    fn low_tier_squeezes_decor_and_extras() {
        let cfg = GovernorConfig::default();
        let mut p = EffectPipeline {
            nodes: vec![EffectNode::new(EffectId::GrainMerge, 0.10)],
            ..full_pipeline()
        };
        // GrainMerge needs Medium, so force a decor id that survives Low
        p.nodes[0].id = EffectId::SMix;
        p.nodes[0].category = NodeCategory::Decor;
        apply(&mut p, PerfTier::Low, &cfg, None);
        assert!(p.nodes[0].weight <= cfg.decor_cap_low + 1e-6);
        match p.extras.as_ref().map(|e| &e.flow) {
            Some(FlowField::DomainWarp { warp_iter, .. }) => assert!(*warp_iter <= 2),
            other => panic!("unexpected flow {other:?}"),
        }
        match p.extras.as_ref().map(|e| &e.texture) {
            Some(TextureAlgo::Fbm { octaves, .. }) => assert!(*octaves <= 4),
            other => panic!("unexpected texture {other:?}"),
        }
    }

    #[test]
    fn override_widens_high_tier_only() {
        let cfg = GovernorConfig::default();
        let mut p = EffectPipeline {
            nodes: vec![
                EffectNode::new(EffectId::SMix, 0.15),
                EffectNode::new(EffectId::DualCurve, 0.15),
                EffectNode::new(EffectId::BloomHL, 0.10),
            ],
            ..full_pipeline()
        };
        apply(&mut p, PerfTier::High, &cfg, Some(0.40));
        assert!((p.total_weight() - 0.40).abs() < 1e-5);

        let mut p = full_pipeline();
        p.nodes[0].weight = 0.20;
        p.nodes[1].weight = 0.20;
        apply(&mut p, PerfTier::Medium, &cfg, Some(0.40));
        assert!(p.total_weight() <= cfg.weight_cap(PerfTier::Medium) + 1e-5);
    }

    #[test]
    fn apply_is_idempotent() {
        let cfg = GovernorConfig::default();
        for tier in [PerfTier::High, PerfTier::Medium, PerfTier::Low] {
            let mut once = full_pipeline();
            apply(&mut once, tier, &cfg, None);
            let mut twice = once.clone();
            apply(&mut twice, tier, &cfg, None);
            assert_eq!(once, twice, "tier {tier:?} not idempotent");
        }
    }
}
