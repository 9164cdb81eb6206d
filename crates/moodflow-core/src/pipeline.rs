//! Effect pipeline data model.
//!
//! The closed catalogue of blend-effect identifiers, the weighted node list
//! handed to the rendering collaborator, the optional generator extras, and
//! the typed uniform vocabulary. Selection-affinity, parameter-weight and
//! degradation concerns all live on [`EffectId`] so the three tables cannot
//! drift apart.

use crate::drive::DriveVector;
use crate::governor::PerfTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hard ceiling for any single node weight, enforced on every mutation.
pub const NODE_WEIGHT_CAP: f32 = 0.22;

/// Closed catalogue of blend-effect identifiers.
///
/// The rendering collaborator maps each id to a shader blend mode; the
/// engine only deals in ids and weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EffectId {
    /// Soft luminance overlay, the calmest base blend
    LumaSoftOverlay,
    /// S-curve mix
    SMix,
    /// Lightness lift in OkLab space
    OkLabLightness,
    /// Bounded color dodge
    BoundedDodge,
    /// Soft burn darkening
    SoftBurn,
    /// Structure-aware mix with flow-field modulation
    StructureMix,
    /// Dual-curve contrast shaping
    DualCurve,
    /// Specular gradient sweep
    SpecularGrad,
    /// Film-grain merge
    GrainMerge,
    /// Highlight bloom
    BloomHL,
    /// Edge tinting
    EdgeTint,
    /// Temporal feedback trail
    TemporalTrail,
}

/// Selection pool a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Always-present foundation blend
    Base,
    /// Primary character effect
    Accent,
    /// Decorative garnish, first to go under load
    Decor,
}

impl NodeCategory {
    /// Keep-priority when the governor has to shed nodes (higher wins).
    pub fn priority(self) -> u8 {
        match self {
            NodeCategory::Base => 3,
            NodeCategory::Accent => 2,
            NodeCategory::Decor => 1,
        }
    }
}

impl EffectId {
    /// Every catalogue member.
    pub const ALL: [EffectId; 12] = [
        EffectId::LumaSoftOverlay,
        EffectId::SMix,
        EffectId::OkLabLightness,
        EffectId::BoundedDodge,
        EffectId::SoftBurn,
        EffectId::StructureMix,
        EffectId::DualCurve,
        EffectId::SpecularGrad,
        EffectId::GrainMerge,
        EffectId::BloomHL,
        EffectId::EdgeTint,
        EffectId::TemporalTrail,
    ];

    /// Base selection pool (3 ids).
    pub const BASE_POOL: [EffectId; 3] = [
        EffectId::LumaSoftOverlay,
        EffectId::SMix,
        EffectId::OkLabLightness,
    ];

    /// Accent selection pool (5 ids).
    pub const ACCENT_POOL: [EffectId; 5] = [
        EffectId::BoundedDodge,
        EffectId::SoftBurn,
        EffectId::StructureMix,
        EffectId::DualCurve,
        EffectId::SpecularGrad,
    ];

    /// Decor selection pool (4 ids).
    pub const DECOR_POOL: [EffectId; 4] = [
        EffectId::GrainMerge,
        EffectId::BloomHL,
        EffectId::EdgeTint,
        EffectId::TemporalTrail,
    ];

    /// Pool membership.
    pub fn category(self) -> NodeCategory {
        match self {
            EffectId::LumaSoftOverlay | EffectId::SMix | EffectId::OkLabLightness => {
                NodeCategory::Base
            }
            EffectId::BoundedDodge
            | EffectId::SoftBurn
            | EffectId::StructureMix
            | EffectId::DualCurve
            | EffectId::SpecularGrad => NodeCategory::Accent,
            EffectId::GrainMerge
            | EffectId::BloomHL
            | EffectId::EdgeTint
            | EffectId::TemporalTrail => NodeCategory::Decor,
        }
    }

    /// Mood-affinity score used during selection. Unbounded above zero;
    /// relative magnitude within a pool is what matters.
    pub fn selection_affinity(self, drive: &DriveVector) -> f32 {
        let DriveVector { e, a, v } = *drive;
        match self {
            EffectId::LumaSoftOverlay => 0.6 + 0.4 * (1.0 - a),
            EffectId::SMix => 0.55 + 0.3 * (1.0 - v.abs()),
            EffectId::OkLabLightness => 0.5 + 0.4 * ((1.0 + v) / 2.0),
            EffectId::BoundedDodge => 0.2 + 0.9 * e + 0.3 * a,
            EffectId::SoftBurn => 0.2 + 0.8 * ((-v + 1.0) / 2.0),
            EffectId::StructureMix => 0.45 + 0.5 * a,
            EffectId::DualCurve => 0.3 + 0.9 * e + 0.2 * a,
            EffectId::SpecularGrad => 0.35 + 0.5 * a,
            EffectId::GrainMerge => 0.4 + 0.4 * (1.0 - a),
            EffectId::BloomHL => 0.2 + 0.7 * e,
            EffectId::EdgeTint => 0.35 + 0.4 * a + 0.2 * ((1.0 + v) / 2.0),
            EffectId::TemporalTrail => 0.4 + 0.4 * (1.0 - a) + 0.2 * e,
        }
    }

    /// Parameter weight for a selected node, bounded per id and scaled down
    /// when performance headroom is gone. Independent of the selection score.
    pub fn parameter_weight(self, drive: &DriveVector, perf_high: bool) -> f32 {
        let DriveVector { e, a, v } = *drive;
        let p = if perf_high { 1.0 } else { 0.7 };
        match self {
            EffectId::LumaSoftOverlay => (0.08 + 0.06 * (1.0 - a)).clamp(0.06, 0.16) * p,
            EffectId::SMix => (0.07 + 0.05 * (1.0 - v.abs())).clamp(0.05, 0.13) * p,
            EffectId::OkLabLightness => (0.06 + 0.06 * ((1.0 + v) / 2.0)).clamp(0.05, 0.14) * p,
            EffectId::BoundedDodge => (0.05 + 0.10 * e).clamp(0.04, 0.16) * p,
            EffectId::SoftBurn => (0.05 + 0.08 * ((-v + 1.0) / 2.0)).clamp(0.04, 0.14) * p,
            EffectId::StructureMix => (0.05 + 0.09 * a).clamp(0.04, 0.14) * p,
            EffectId::DualCurve => (0.05 + 0.10 * e).clamp(0.05, 0.16) * p,
            EffectId::SpecularGrad => (0.04 + 0.08 * a).clamp(0.03, 0.12) * p,
            EffectId::GrainMerge => (0.04 + 0.06 * (1.0 - a)).clamp(0.03, 0.10) * p,
            EffectId::BloomHL => {
                let w = (0.04 + 0.08 * e).clamp(0.03, 0.12);
                if perf_high {
                    w
                } else {
                    0.0
                }
            }
            EffectId::EdgeTint => {
                (0.03 + 0.06 * (a * 0.7 + (1.0 + v) / 3.0)).clamp(0.02, 0.09) * p
            }
            EffectId::TemporalTrail => {
                let w = (0.03 + 0.06 * (1.0 - a) + 0.03 * e).clamp(0.02, 0.09);
                if perf_high {
                    w
                } else {
                    w * 0.5
                }
            }
        }
    }

    /// Minimum performance tier at which this effect stays enabled.
    pub fn required_tier(self) -> PerfTier {
        match self {
            EffectId::BloomHL | EffectId::TemporalTrail => PerfTier::High,
            EffectId::EdgeTint | EffectId::GrainMerge | EffectId::SpecularGrad => PerfTier::Medium,
            _ => PerfTier::Low,
        }
    }
}

/// Closed vocabulary of uniform names the engine may write.
///
/// Serialized names match the shader-side uniform keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UniformKey {
    /// Flow-field displacement radius on StructureMix
    #[serde(rename = "flowRadius")]
    FlowRadius,
    /// Burn mask gain on SoftBurn
    #[serde(rename = "maskGain")]
    MaskGain,
    /// Line-integral-convolution strength on StructureMix
    #[serde(rename = "licStrength")]
    LicStrength,
    /// Light sweep phase on SpecularGrad
    #[serde(rename = "lightPhase")]
    LightPhase,
    /// Global brightness ceiling
    #[serde(rename = "brightCap")]
    BrightCap,
    /// Per-frame weight jitter amplitude
    #[serde(rename = "wJitter")]
    WeightJitter,
    /// Vividness gate on DualCurve
    #[serde(rename = "vividGate")]
    VividGate,
    /// Accent refresh pulse
    #[serde(rename = "refresh")]
    Refresh,
    /// Global calm hold during silence
    #[serde(rename = "calm")]
    Calm,
    /// Hue shift on EdgeTint
    #[serde(rename = "tintHueShift")]
    TintHueShift,
    /// Lightness boost on OkLabLightness
    #[serde(rename = "lBoost")]
    LightnessBoost,
    /// Edge gain on StructureMix
    #[serde(rename = "edgeGain")]
    EdgeGain,
    /// Flow-field displacement amplitude (flow extra)
    #[serde(rename = "flowAmp")]
    FlowAmp,
    /// Flow-field frequency scale (flow extra)
    #[serde(rename = "flowScale")]
    FlowScale,
    /// Texture output gain (texture extra)
    #[serde(rename = "texGain")]
    TexGain,
    /// Worley cell sharpness (texture extra)
    #[serde(rename = "cellSharp")]
    CellSharp,
    /// Iteration count knob, simplified under load
    #[serde(rename = "iterations")]
    Iterations,
    /// Quality knob, simplified under load
    #[serde(rename = "quality")]
    Quality,
}

/// Where a uniform write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UniformScope {
    /// Every node in the pipeline
    Global,
    /// All nodes of one category
    Category(NodeCategory),
    /// One specific node
    Node(EffectId),
    /// The flow-field extra
    Flow,
    /// The texture extra
    Texture,
}

/// One weighted effect node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectNode {
    /// Effect identifier
    pub id: EffectId,
    /// Blend weight, `0.0..=NODE_WEIGHT_CAP`
    pub weight: f32,
    /// Selection pool this node was drawn from
    pub category: NodeCategory,
    /// Per-node uniform overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uniforms: BTreeMap<UniformKey, f32>,
}

impl EffectNode {
    /// Create a node with no uniform overrides.
    pub fn new(id: EffectId, weight: f32) -> Self {
        Self {
            id,
            weight,
            category: id.category(),
            uniforms: BTreeMap::new(),
        }
    }
}

/// Flow-field generator choice with its tuned parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum FlowField {
    /// Divergence-free curl noise
    CurlNoise {
        /// Displacement amplitude
        flow_amp: f32,
        /// Noise frequency scale
        flow_scale: f32,
    },
    /// Damped fluid solve
    StableFluid {
        /// Velocity damping per frame
        damp: f32,
        /// Injection force
        force: f32,
    },
    /// Iterated domain warping
    DomainWarp {
        /// Warp amplitude
        warp_amp: f32,
        /// Warp iterations
        warp_iter: u32,
    },
    /// Line integral convolution
    Lic {
        /// Streamline length
        lic_len: f32,
        /// Output gain
        lic_gain: f32,
    },
}

/// Texture generator choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum TextureAlgo {
    /// Simplex noise
    Simplex {
        /// Frequency scale
        scale: f32,
        /// Output gain
        gain: f32,
    },
    /// Fractal Brownian motion
    Fbm {
        /// Frequency scale
        scale: f32,
        /// Octave count
        octaves: u32,
        /// Per-octave gain
        gain: f32,
    },
    /// Ridged multifractal
    Ridged {
        /// Frequency scale
        scale: f32,
        /// Ridge gain
        gain: f32,
    },
    /// Worley cellular noise
    Worley {
        /// Frequency scale
        scale: f32,
        /// Cell edge sharpness
        cell_sharp: f32,
    },
    /// Gabor noise
    Gabor {
        /// Frequency scale
        scale: f32,
        /// Kernel anisotropy
        anisotropy: f32,
    },
}

/// Pattern generator choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum PatternAlgo {
    /// Gray-Scott reaction-diffusion
    ReactionDiffusion {
        /// Feed rate
        feed: f32,
        /// Kill rate
        kill: f32,
    },
    /// Lenia continuous cellular automaton
    Lenia {
        /// Kernel radius
        radius: f32,
        /// Growth sharpness
        beta: f32,
    },
    /// Wave function collapse tiling
    Wfc {
        /// Tiling seed
        seed: u32,
    },
}

/// One generator per family, chosen alongside the node set on rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extras {
    /// Flow-field generator
    pub flow: FlowField,
    /// Texture generator
    pub texture: TextureAlgo,
    /// Pattern generator
    pub pattern: PatternAlgo,
}

/// The weighted effect set handed to the rendering collaborator.
///
/// Created by the scheduler on rebuild, nudged in place by the
/// micro-modulator and the performance governor within the same tick,
/// replaced wholesale on the next rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectPipeline {
    /// Weighted effect nodes, at most one per category
    pub nodes: Vec<EffectNode>,
    /// Lifetime before a forced re-selection
    pub ttl_ms: u64,
    /// Chosen preset id, if the catalogue was non-empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<String>,
    /// Generator extras
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extras: Option<Extras>,
}

impl EffectPipeline {
    /// Sum of all node weights.
    pub fn total_weight(&self) -> f32 {
        self.nodes.iter().map(|n| n.weight).sum()
    }

    /// Whether a node with the given id is present.
    pub fn has_node(&self, id: EffectId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Mutable access to a node by id.
    pub fn node_mut(&mut self, id: EffectId) -> Option<&mut EffectNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Nudge a node's weight by a signed delta, clamped into
    /// `[0, NODE_WEIGHT_CAP]`. Missing node is a silent no-op.
    pub fn nudge_weight(&mut self, id: EffectId, delta: f32) {
        if let Some(node) = self.node_mut(id) {
            node.weight = (node.weight + delta).clamp(0.0, NODE_WEIGHT_CAP);
        }
    }

    /// Write a uniform through the typed scope vocabulary.
    ///
    /// Targets that are absent from the pipeline (missing node, extras
    /// variant without the parameter) are silent no-ops.
    pub fn set_uniform(&mut self, scope: UniformScope, key: UniformKey, value: f32) {
        match scope {
            UniformScope::Global => {
                for node in &mut self.nodes {
                    node.uniforms.insert(key, value);
                }
            }
            UniformScope::Category(category) => {
                for node in &mut self.nodes {
                    if node.category == category {
                        node.uniforms.insert(key, value);
                    }
                }
            }
            UniformScope::Node(id) => {
                if let Some(node) = self.node_mut(id) {
                    node.uniforms.insert(key, value);
                }
            }
            UniformScope::Flow => self.set_flow_uniform(key, value),
            UniformScope::Texture => self.set_texture_uniform(key, value),
        }
    }

    fn set_flow_uniform(&mut self, key: UniformKey, value: f32) {
        let Some(extras) = self.extras.as_mut() else {
            return;
        };
        if let FlowField::CurlNoise {
            flow_amp,
            flow_scale,
        } = &mut extras.flow
        {
            match key {
                UniformKey::FlowAmp => *flow_amp = value,
                UniformKey::FlowScale => *flow_scale = value,
                _ => {}
            }
        }
    }

    fn set_texture_uniform(&mut self, key: UniformKey, value: f32) {
        let Some(extras) = self.extras.as_mut() else {
            return;
        };
        match (&mut extras.texture, key) {
            (TextureAlgo::Simplex { gain, .. }, UniformKey::TexGain)
            | (TextureAlgo::Fbm { gain, .. }, UniformKey::TexGain)
            | (TextureAlgo::Ridged { gain, .. }, UniformKey::TexGain) => *gain = value,
            (TextureAlgo::Worley { cell_sharp, .. }, UniformKey::CellSharp) => {
                *cell_sharp = value;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> EffectPipeline {
        EffectPipeline {
            nodes: vec![
                EffectNode::new(EffectId::SMix, 0.10),
                EffectNode::new(EffectId::BoundedDodge, 0.08),
                EffectNode::new(EffectId::GrainMerge, 0.04),
            ],
            ttl_ms: 30_000,
            preset_id: None,
            extras: Some(Extras {
                flow: FlowField::CurlNoise {
                    flow_amp: 0.03,
                    flow_scale: 1.0,
                },
                texture: TextureAlgo::Worley {
                    scale: 4.0,
                    cell_sharp: 0.6,
                },
                pattern: PatternAlgo::Wfc { seed: 7 },
            }),
        }
    }

    #[test]
    fn pools_partition_the_catalogue() {
        let mut seen: Vec<EffectId> = EffectId::BASE_POOL
            .iter()
            .chain(EffectId::ACCENT_POOL.iter())
            .chain(EffectId::DECOR_POOL.iter())
            .copied()
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), EffectId::ALL.len());
        for id in EffectId::ALL {
            let pool: &[EffectId] = match id.category() {
                NodeCategory::Base => &EffectId::BASE_POOL,
                NodeCategory::Accent => &EffectId::ACCENT_POOL,
                NodeCategory::Decor => &EffectId::DECOR_POOL,
            };
            assert!(pool.contains(&id));
        }
    }

    #[test]
    fn affinity_tracks_energy_for_dodge() {
        let calm = DriveVector {
            e: 0.1,
            a: 0.2,
            v: 0.0,
        };
        let hot = DriveVector {
            e: 0.9,
            a: 0.8,
            v: 0.0,
        };
        assert!(
            EffectId::BoundedDodge.selection_affinity(&hot)
                > EffectId::BoundedDodge.selection_affinity(&calm)
        );
        assert!(
            EffectId::LumaSoftOverlay.selection_affinity(&calm)
                > EffectId::LumaSoftOverlay.selection_affinity(&hot)
        );
    }

    #[test]
    fn bloom_weight_drops_to_zero_without_headroom() {
        let drive = DriveVector {
            e: 0.8,
            a: 0.5,
            v: 0.0,
        };
        assert!(EffectId::BloomHL.parameter_weight(&drive, true) > 0.0);
        assert_eq!(EffectId::BloomHL.parameter_weight(&drive, false), 0.0);
    }

    #[test]
    fn trail_weight_halves_without_headroom() {
        let drive = DriveVector {
            e: 0.5,
            a: 0.3,
            v: 0.0,
        };
        let high = EffectId::TemporalTrail.parameter_weight(&drive, true);
        let low = EffectId::TemporalTrail.parameter_weight(&drive, false);
        assert!((low - high * 0.5).abs() < 1e-6);
    }

    #[test]
    fn weights_respect_per_id_bounds() {
        let extremes = [
            DriveVector {
                e: 0.0,
                a: 0.0,
                v: -1.0,
            },
            DriveVector {
                e: 1.0,
                a: 1.0,
                v: 1.0,
            },
        ];
        for drive in &extremes {
            for id in EffectId::ALL {
                let w = id.parameter_weight(drive, true);
                assert!(w >= 0.0 && w <= 0.16, "{id:?} weight {w} out of range");
            }
        }
    }

    #[test]
    fn nudge_clamps_to_cap() {
        let mut p = pipeline();
        p.nudge_weight(EffectId::BoundedDodge, 1.0);
        assert_eq!(p.node_mut(EffectId::BoundedDodge).unwrap().weight, NODE_WEIGHT_CAP);
        p.nudge_weight(EffectId::BoundedDodge, -1.0);
        assert_eq!(p.node_mut(EffectId::BoundedDodge).unwrap().weight, 0.0);
        // absent node is a no-op
        p.nudge_weight(EffectId::BloomHL, 0.1);
        assert!(!p.has_node(EffectId::BloomHL));
    }

    #[test]
    fn scoped_uniform_writes() {
        let mut p = pipeline();
        p.set_uniform(UniformScope::Global, UniformKey::BrightCap, 0.85);
        assert!(p
            .nodes
            .iter()
            .all(|n| n.uniforms.get(&UniformKey::BrightCap) == Some(&0.85)));

        p.set_uniform(
            UniformScope::Category(NodeCategory::Decor),
            UniformKey::WeightJitter,
            0.02,
        );
        assert_eq!(
            p.node_mut(EffectId::GrainMerge).unwrap().uniforms[&UniformKey::WeightJitter],
            0.02
        );
        assert!(!p
            .node_mut(EffectId::SMix)
            .unwrap()
            .uniforms
            .contains_key(&UniformKey::WeightJitter));

        p.set_uniform(UniformScope::Node(EffectId::SMix), UniformKey::Calm, 1.0);
        assert_eq!(p.node_mut(EffectId::SMix).unwrap().uniforms[&UniformKey::Calm], 1.0);
    }

    #[test]
    fn flow_scope_only_touches_curl_noise() {
        let mut p = pipeline();
        p.set_uniform(UniformScope::Flow, UniformKey::FlowAmp, 0.05);
        match &p.extras.as_ref().unwrap().flow {
            FlowField::CurlNoise { flow_amp, .. } => assert_eq!(*flow_amp, 0.05),
            other => panic!("unexpected flow field {other:?}"),
        }

        p.extras.as_mut().unwrap().flow = FlowField::Lic {
            lic_len: 8.0,
            lic_gain: 0.6,
        };
        p.set_uniform(UniformScope::Flow, UniformKey::FlowAmp, 0.09);
        match &p.extras.as_ref().unwrap().flow {
            FlowField::Lic { lic_len, .. } => assert_eq!(*lic_len, 8.0),
            other => panic!("unexpected flow field {other:?}"),
        }
    }

    #[test]
    fn texture_scope_routes_by_variant() {
        let mut p = pipeline();
        p.set_uniform(UniformScope::Texture, UniformKey::CellSharp, 0.9);
        match &p.extras.as_ref().unwrap().texture {
            TextureAlgo::Worley { cell_sharp, .. } => assert_eq!(*cell_sharp, 0.9),
            other => panic!("unexpected texture {other:?}"),
        }
        // TexGain has no slot on Worley
        p.set_uniform(UniformScope::Texture, UniformKey::TexGain, 0.5);
        match &p.extras.as_ref().unwrap().texture {
            TextureAlgo::Worley { cell_sharp, .. } => assert_eq!(*cell_sharp, 0.9),
            other => panic!("unexpected texture {other:?}"),
        }
    }

    #[test]
    fn uniform_keys_serialize_camel_case() {
        let json = serde_json::to_string(&UniformKey::TintHueShift).unwrap();
        assert_eq!(json, "\"tintHueShift\"");
        let json = serde_json::to_string(&UniformKey::FlowAmp).unwrap();
        assert_eq!(json, "\"flowAmp\"");
    }
}
