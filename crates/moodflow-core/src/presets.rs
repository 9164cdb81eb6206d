//! Preset catalogue.
//!
//! A preset is a named look with static tags describing its material and
//! mood character. The engine scores tags against the current drive vector
//! at rebuild time; it never interprets the look itself.

use serde::{Deserialize, Serialize};

/// Static character tags attached to a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetTags {
    /// Metallic material affinity, `0..=1`
    #[serde(default)]
    pub metal_score: f32,
    /// How much high energy favors this look
    #[serde(default)]
    pub energy_bias: f32,
    /// How much positive valence favors this look
    #[serde(default)]
    pub valence_bias: f32,
    /// How much high arousal favors this look
    #[serde(default)]
    pub arousal_bias: f32,
    /// Risk of a visible hue jump when entering the look
    #[serde(default)]
    pub hue_shift_risk: f32,
    /// Specular highlight affinity
    #[serde(default)]
    pub specular_boost: f32,
    /// Ripple/flow affinity
    #[serde(default)]
    pub ripple_affinity: f32,
    /// Relative render cost, small integers
    #[serde(default = "default_cost")]
    pub cost: f32,
    /// Flow-field affinity
    #[serde(default)]
    pub flow_affinity: f32,
    /// Organic/growth affinity
    #[serde(default)]
    pub organic_affinity: f32,
    /// Fracture/glitch affinity
    #[serde(default)]
    pub fracture_affinity: f32,
}

fn default_cost() -> f32 {
    1.0
}

impl Default for PresetTags {
    fn default() -> Self {
        Self {
            metal_score: 0.0,
            energy_bias: 0.0,
            valence_bias: 0.0,
            arousal_bias: 0.0,
            hue_shift_risk: 0.0,
            specular_boost: 0.0,
            ripple_affinity: 0.0,
            cost: 1.0,
            flow_affinity: 0.0,
            organic_affinity: 0.0,
            fracture_affinity: 0.0,
        }
    }
}

/// A named look in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Stable identifier, also the history key
    pub id: String,
    /// Character tags
    #[serde(default)]
    pub tags: PresetTags,
}

/// Parse a preset catalogue from JSON.
pub fn load_catalogue(json: &str) -> Result<Vec<Preset>, serde_json::Error> {
    serde_json::from_str(json)
}
