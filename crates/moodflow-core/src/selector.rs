//! Rebuild-time selection.
//!
//! On each pipeline rebuild the selector draws one node per category pool,
//! one generator per extras family, and optionally a preset. Every draw is
//! a roulette wheel over mood-affinity scores shaped by the transition
//! matrix and the cooldown/diversity penalties from history.

use crate::beat_grid::StepState;
use crate::config::EngineConfig;
use crate::drive::DriveVector;
use crate::history::{HistoryKey, SelectionHistory, TransitionMatrix};
use crate::pipeline::{
    EffectId, EffectNode, Extras, FlowField, NodeCategory, PatternAlgo, TextureAlgo,
};
use crate::presets::Preset;
use crate::rng::EngineRng;
use tracing::debug;

/// Decor weight multiplier during the phrase tail.
const PHRASE_TAIL_DECOR_BOOST: f32 = 1.2;

/// Decor weight ceiling while boosted.
const PHRASE_TAIL_DECOR_CAP: f32 = 0.15;

/// Score floor so no candidate is ever fully unreachable.
const SCORE_FLOOR: f32 = 1e-3;

/// Draw the node set for a new pipeline.
///
/// One roulette pick per category pool, in base/accent/decor order, until
/// the node limit is hit. A pick whose parameter weight would push the
/// total past the sigma budget is silently dropped.
#[allow(clippy::too_many_arguments)]
pub fn pick_nodes(
    drive: &DriveVector,
    step: &StepState,
    cfg: &EngineConfig,
    history: &SelectionHistory,
    matrix: &TransitionMatrix,
    prev: Option<EffectId>,
    perf_high: bool,
    now_ms: f64,
    rng: &mut EngineRng,
) -> Vec<EffectNode> {
    let pools: [&[EffectId]; 3] = [
        &EffectId::BASE_POOL,
        &EffectId::ACCENT_POOL,
        &EffectId::DECOR_POOL,
    ];
    let phrase_tail = step.phase_in_phrase >= step.phrase_bars.saturating_sub(2);

    let mut nodes: Vec<EffectNode> = Vec::with_capacity(cfg.node_limit);
    let mut total = 0.0f32;

    for pool in pools {
        if nodes.len() >= cfg.node_limit {
            break;
        }
        let candidates: Vec<(EffectId, f32)> = pool
            .iter()
            .map(|&id| {
                let mut score = id.selection_affinity(drive).max(SCORE_FLOOR);
                if cfg.markov {
                    if let Some(prev) = prev {
                        score *= 1.0 + matrix.bonus(prev, id);
                    }
                }
                score *= history.penalty(
                    &HistoryKey::Effect(id),
                    now_ms,
                    cfg.cool_ms,
                    cfg.diversity,
                );
                (id, score)
            })
            .collect();

        let Some(&id) = rng.pick_weighted(&candidates) else {
            continue;
        };
        let mut weight = id.parameter_weight(drive, perf_high);
        if id.category() == NodeCategory::Decor && phrase_tail {
            weight = (weight * PHRASE_TAIL_DECOR_BOOST).min(PHRASE_TAIL_DECOR_CAP);
        }
        if total + weight > cfg.sigma_limit {
            debug!(id = ?id, weight, total, "node dropped, weight budget exhausted");
            continue;
        }
        total += weight;
        nodes.push(EffectNode::new(id, weight));
    }
    nodes
}

/// Draw one generator per extras family.
pub fn pick_extras(drive: &DriveVector, rng: &mut EngineRng) -> Extras {
    let DriveVector { e, a, v } = *drive;

    let flow_candidates = [
        (0u8, 0.5 + 0.4 * a),
        (1, 0.3 + 0.2 * e),
        (2, 0.2 + 0.3 * (1.0 - a)),
        (3, 0.15 + 0.25 * e),
    ];
    let flow = match rng.pick_weighted(&flow_candidates).copied().unwrap_or(0) {
        0 => FlowField::CurlNoise {
            flow_amp: 0.02 + 0.03 * e,
            flow_scale: 0.8 + 1.2 * a,
        },
        1 => FlowField::DomainWarp {
            warp_amp: 0.015 + 0.02 * e,
            warp_iter: 1 + (2.0 * a) as u32,
        },
        2 => FlowField::Lic {
            lic_len: 6.0 + 10.0 * a,
            lic_gain: 0.6,
        },
        _ => FlowField::StableFluid {
            damp: 0.96,
            force: 0.4 + 0.6 * e,
        },
    };

    let texture_candidates = [
        (0u8, 0.35 + 0.2 * (1.0 - a)),
        (1, 0.35 + 0.2 * e),
        (2, 0.25 + 0.2 * (-v).max(0.0)),
        (3, 0.25 + 0.15 * e),
        (4, 0.2 + 0.2 * a),
    ];
    let texture = match rng.pick_weighted(&texture_candidates).copied().unwrap_or(0) {
        0 => TextureAlgo::Simplex {
            scale: 2.0,
            gain: 0.8,
        },
        1 => TextureAlgo::Fbm {
            scale: 2.5,
            octaves: 4,
            gain: 0.55,
        },
        2 => TextureAlgo::Ridged {
            scale: 3.0,
            gain: 0.8,
        },
        3 => TextureAlgo::Worley {
            scale: 4.0,
            cell_sharp: 0.6,
        },
        _ => TextureAlgo::Gabor {
            scale: 3.0,
            anisotropy: 0.8,
        },
    };

    let pattern_candidates = [
        (0u8, 0.45 + (1.0 + a) * 0.1),
        (1, 0.35 + 0.25 * a),
        (2, 0.25 + 0.2 * e),
    ];
    let pattern = match rng.pick_weighted(&pattern_candidates).copied().unwrap_or(0) {
        0 => PatternAlgo::ReactionDiffusion {
            feed: 0.037 + 0.01 * e,
            kill: 0.06 + 0.01 * ((1.0 + v) / 2.0),
        },
        1 => PatternAlgo::Lenia {
            radius: 0.08 + 0.04 * a,
            beta: 2.0,
        },
        _ => PatternAlgo::Wfc {
            seed: rng.next_u32(),
        },
    };

    Extras {
        flow,
        texture,
        pattern,
    }
}

/// Score a preset catalogue against the drive vector and roulette-pick one.
///
/// Returns `None` only for an empty catalogue; scores are floored so an
/// all-zero catalogue degrades to a uniform draw.
pub fn pick_preset(
    presets: &[Preset],
    drive: &DriveVector,
    perf_high: bool,
    history: &SelectionHistory,
    cfg: &EngineConfig,
    now_ms: f64,
    rng: &mut EngineRng,
) -> Option<String> {
    let DriveVector { e, a, v } = *drive;
    let candidates: Vec<(&str, f32)> = presets
        .iter()
        .map(|preset| {
            let t = &preset.tags;
            let mut score = 0.6 * t.metal_score
                + 0.2 * t.specular_boost
                + 0.2 * t.ripple_affinity
                + 0.35 * e * t.energy_bias
                + 0.25 * a * t.arousal_bias
                + 0.15 * ((v + 1.0) / 2.0) * t.valence_bias;
            score *= 1.0 - 0.5 * t.hue_shift_risk;
            if t.cost > 3.0 && !perf_high {
                score *= 0.5;
            }
            score *= history.penalty(
                &HistoryKey::Preset(preset.id.clone()),
                now_ms,
                cfg.cool_ms,
                cfg.diversity,
            );
            (preset.id.as_str(), score.max(SCORE_FLOOR))
        })
        .collect();
    rng.pick_weighted(&candidates).map(|id| id.to_string())
}
