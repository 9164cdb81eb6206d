//! Track-transition technique selection.
//!
//! Picks one of twenty named transition strategies when a track change is
//! announced. Safety concerns are evaluated strictly before aesthetics:
//! an explicit simple-mode flag, link instability, detected vocals and key
//! clashes each narrow the decision to a whitelist, in that order, and
//! only then does the segment/tempo chain and the mood bias run. Every
//! fired rule appends to an audit trail on the decision.

use crate::config::ConfigError;
use crate::drive::{Mood, Segment};
use crate::rng::EngineRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Named transition strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Plain head/tail cut, the safest move
    SimpleHeadTail,
    /// 16-beat phrase cut
    PhraseCut16,
    /// 32-beat phrase cut
    PhraseCut32,
    /// 24-beat layered blend
    LongLayer24,
    /// 32-beat layered blend
    LongLayer32,
    /// Aligned double drop over 32 beats
    DoubleDrop32,
    /// Triple drop over 48 beats
    TripleDrop48,
    /// 16-beat riser into the swap
    BuildUp16,
    /// 32-beat riser into the swap
    BuildUp32,
    /// 8-beat fill bridge
    FillBridge8,
    /// Backspin with a safety net
    BackspinSafe,
    /// Brake effect stop
    BrakeFx,
    /// Stutter gate chop
    StutterGate,
    /// Echo tail fade
    EchoFade,
    /// Filter sweep crossover
    FilterSweep,
    /// Mid-scooped crossfade
    MidScoopCross,
    /// High-pass handoff
    HighPassSwap,
    /// Low-pass handoff
    LowPassSwap,
    /// Manual-feel volume ride
    VolumeRide,
    /// Gradual tempo match
    TempoMatch,
}

impl Technique {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Technique::SimpleHeadTail => "simple_head_tail",
            Technique::PhraseCut16 => "phrase_cut_16",
            Technique::PhraseCut32 => "phrase_cut_32",
            Technique::LongLayer24 => "long_layer_24",
            Technique::LongLayer32 => "long_layer_32",
            Technique::DoubleDrop32 => "double_drop_32",
            Technique::TripleDrop48 => "triple_drop_48",
            Technique::BuildUp16 => "build_up_16",
            Technique::BuildUp32 => "build_up_32",
            Technique::FillBridge8 => "fill_bridge_8",
            Technique::BackspinSafe => "backspin_safe",
            Technique::BrakeFx => "brake_fx",
            Technique::StutterGate => "stutter_gate",
            Technique::EchoFade => "echo_fade",
            Technique::FilterSweep => "filter_sweep",
            Technique::MidScoopCross => "mid_scoop_cross",
            Technique::HighPassSwap => "high_pass_swap",
            Technique::LowPassSwap => "low_pass_swap",
            Technique::VolumeRide => "volume_ride",
            Technique::TempoMatch => "tempo_match",
        }
    }

    /// Whether the technique leaves vocals intact.
    pub fn vocal_safe(self) -> bool {
        !matches!(
            self,
            Technique::DoubleDrop32
                | Technique::TripleDrop48
                | Technique::BackspinSafe
                | Technique::BrakeFx
                | Technique::StutterGate
        )
    }

    /// Parameter hints for the mixing collaborator.
    pub fn hint(self) -> TechniqueHint {
        match self {
            Technique::SimpleHeadTail => TechniqueHint::beats(4),
            Technique::PhraseCut16 => TechniqueHint::beats(16).eq(0, -2, 0),
            Technique::PhraseCut32 => TechniqueHint::beats(32).eq(0, -1, 0),
            Technique::LongLayer24 => TechniqueHint::beats(24).eq(-1, 0, -1).looped(24, 8),
            Technique::LongLayer32 => TechniqueHint::beats(32).eq(-1, 0, -1).looped(32, 12),
            Technique::DoubleDrop32 => TechniqueHint::beats(32)
                .eq(3, 2, 1)
                .fx(0.3, 0.2, 0.1)
                .action(TechniqueAction::DoubleDropCue),
            Technique::TripleDrop48 => TechniqueHint::beats(48)
                .eq(4, 3, 2)
                .fx(0.4, 0.3, 0.2)
                .action(TechniqueAction::DoubleDropCue),
            Technique::BuildUp16 => TechniqueHint::beats(16)
                .eq(1, 2, 1)
                .filter(FilterKind::LowPass, 8_000.0, 0.5),
            Technique::BuildUp32 => TechniqueHint::beats(32)
                .eq(1, 2, 1)
                .filter(FilterKind::LowPass, 8_000.0, 0.5),
            Technique::FillBridge8 => TechniqueHint::beats(8).eq(0, 1, 0),
            Technique::BackspinSafe => TechniqueHint::beats(8)
                .eq(0, -1, 0)
                .action(TechniqueAction::Backspin),
            Technique::BrakeFx => TechniqueHint::beats(4)
                .eq(2, 1, 0)
                .fx(0.2, 0.1, 0.0)
                .action(TechniqueAction::Brake),
            Technique::StutterGate => {
                TechniqueHint::beats(4).eq(1, 2, 1).fx(0.0, 0.3, 0.2)
            }
            Technique::EchoFade => TechniqueHint::beats(16).eq(0, 0, 1).fx(0.4, 0.3, 0.0),
            Technique::FilterSweep => {
                TechniqueHint::beats(16).filter(FilterKind::BandPass, 1_000.0, 0.7)
            }
            Technique::MidScoopCross => TechniqueHint::beats(16).eq(0, -3, 0),
            Technique::HighPassSwap => {
                TechniqueHint::beats(16).filter(FilterKind::HighPass, 200.0, 0.5)
            }
            Technique::LowPassSwap => {
                TechniqueHint::beats(16).filter(FilterKind::LowPass, 8_000.0, 0.5)
            }
            Technique::VolumeRide => TechniqueHint::beats(32),
            Technique::TempoMatch => TechniqueHint::beats(32),
        }
    }
}

/// Three-band EQ offsets in dB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqHint {
    /// Low band offset
    pub low: i8,
    /// Mid band offset
    pub mid: i8,
    /// High band offset
    pub high: i8,
}

/// Filter family for a filter hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Cut below the cutoff
    HighPass,
    /// Cut above the cutoff
    LowPass,
    /// Keep a band around the cutoff
    BandPass,
}

/// Filter sweep hint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterHint {
    /// Filter family
    pub kind: FilterKind,
    /// Cutoff or center frequency
    pub frequency_hz: f32,
    /// Resonance, `0..=1`
    pub resonance: f32,
}

/// Send-effect levels, `0..=1` each.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FxHint {
    /// Reverb send
    pub reverb: f32,
    /// Delay send
    pub delay: f32,
    /// Distortion amount
    pub distortion: f32,
}

/// Discrete deck actions a technique may cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueAction {
    /// Kill the outgoing low band
    BassKill,
    /// Backspin the outgoing deck
    Backspin,
    /// Brake the outgoing deck
    Brake,
    /// Cue both drops to land together
    DoubleDropCue,
    /// Sidechain-duck the outgoing deck
    DuckSidechain,
}

/// Loop capture hint in beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopHint {
    /// Loop length
    pub length: u32,
    /// Crossfade length
    pub crossfade: u32,
}

/// Parameter hints attached to a chosen technique. The mixing collaborator
/// may act on any subset or ignore them entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueHint {
    /// Transition length in beats
    pub beats: u32,
    /// EQ offsets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<EqHint>,
    /// Filter move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterHint>,
    /// Send effects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fx: Option<FxHint>,
    /// Loop capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_hint: Option<LoopHint>,
    /// Deck actions to cue
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub actions: Vec<TechniqueAction>,
}

impl TechniqueHint {
    fn beats(beats: u32) -> Self {
        Self {
            beats,
            eq: None,
            filter: None,
            fx: None,
            loop_hint: None,
            actions: Vec::new(),
        }
    }

    fn eq(mut self, low: i8, mid: i8, high: i8) -> Self {
        self.eq = Some(EqHint { low, mid, high });
        self
    }

    fn filter(mut self, kind: FilterKind, frequency_hz: f32, resonance: f32) -> Self {
        self.filter = Some(FilterHint {
            kind,
            frequency_hz,
            resonance,
        });
        self
    }

    fn fx(mut self, reverb: f32, delay: f32, distortion: f32) -> Self {
        self.fx = Some(FxHint {
            reverb,
            delay,
            distortion,
        });
        self
    }

    fn looped(mut self, length: u32, crossfade: u32) -> Self {
        self.loop_hint = Some(LoopHint { length, crossfade });
        self
    }

    fn action(mut self, action: TechniqueAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Everything the selector looks at for one track change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TechContext {
    /// Outgoing track tempo
    pub bpm_from: Option<f32>,
    /// Incoming track tempo
    pub bpm_to: Option<f32>,
    /// Outgoing track Camelot key
    pub key_from: Option<String>,
    /// Incoming track Camelot key
    pub key_to: Option<String>,
    /// Segment the outgoing track is in
    pub segment: Option<Segment>,
    /// Detected vocal presence, `0..=1`
    pub vocality: f32,
    /// Operator flag forcing the plain head/tail cut
    pub simple_head_tail: bool,
    /// Recent stream dropout rate, `0..=1`
    pub dropout_rate: f32,
    /// Errors observed in the recent window
    pub recent_errors: u32,
    /// Current mood, for the lowest-priority bias
    pub emotion: Option<Mood>,
}

/// A chosen technique with its hints and the rules that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueDecision {
    /// The chosen strategy
    pub technique: Technique,
    /// Parameter hints
    pub hint: TechniqueHint,
    /// Ordered audit trail of fired rules
    pub reason: Vec<String>,
}

impl TechniqueDecision {
    fn new(technique: Technique, reason: Vec<String>) -> Self {
        Self {
            technique,
            hint: technique.hint(),
            reason,
        }
    }
}

/// Camelot-wheel compatibility.
///
/// Compatible when the codes match, when they share the letter and the
/// numbers are neighbors on the wheel (difference 1, or 11 for the 12/1
/// wrap), or when they share the number across letters (relative
/// major/minor). Unparseable or missing keys count as compatible; the key
/// gate must never block a transition on bad metadata.
pub fn key_compatible(from: Option<&str>, to: Option<&str>) -> bool {
    let (Some(from), Some(to)) = (from, to) else {
        return true;
    };
    let (Some((fnum, fletter)), Some((tnum, tletter))) = (parse_camelot(from), parse_camelot(to))
    else {
        return true;
    };
    if fnum == tnum && fletter == tletter {
        return true;
    }
    if fletter == tletter {
        let diff = fnum.abs_diff(tnum);
        return diff == 1 || diff == 11;
    }
    fnum == tnum
}

fn parse_camelot(code: &str) -> Option<(u8, char)> {
    let code = code.trim();
    let letter = code.chars().last()?.to_ascii_uppercase();
    if letter != 'A' && letter != 'B' {
        return None;
    }
    let num: u8 = code[..code.len() - 1].parse().ok()?;
    (1..=12).contains(&num).then_some((num, letter))
}

/// Whitelists and thresholds for the safety chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechniqueSelectorConfig {
    /// Fallback pool when the link is unstable
    pub conservative: Vec<Technique>,
    /// Pool when vocals are present
    pub vocal_safe: Vec<Technique>,
    /// Pool when the keys clash
    pub key_clash: Vec<Technique>,
    /// Dropout rate above which the link counts as unstable
    pub dropout_max: f32,
    /// Vocality above which the vocal gate fires
    pub vocality_max: f32,
}

impl Default for TechniqueSelectorConfig {
    fn default() -> Self {
        use Technique::*;
        Self {
            conservative: vec![
                SimpleHeadTail,
                PhraseCut16,
                LongLayer24,
                MidScoopCross,
                VolumeRide,
                TempoMatch,
            ],
            vocal_safe: vec![
                SimpleHeadTail,
                PhraseCut16,
                PhraseCut32,
                LongLayer24,
                LongLayer32,
                MidScoopCross,
                HighPassSwap,
                LowPassSwap,
                VolumeRide,
                TempoMatch,
            ],
            key_clash: vec![SimpleHeadTail, PhraseCut16, LongLayer24],
            dropout_max: 0.05,
            vocality_max: 0.2,
        }
    }
}

impl TechniqueSelectorConfig {
    /// An empty whitelist would make a safety gate unsatisfiable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conservative.is_empty() {
            return Err(ConfigError::EmptyWhitelist("conservative"));
        }
        if self.vocal_safe.is_empty() {
            return Err(ConfigError::EmptyWhitelist("vocal_safe"));
        }
        if self.key_clash.is_empty() {
            return Err(ConfigError::EmptyWhitelist("key_clash"));
        }
        Ok(())
    }
}

/// One entry of the priority-ordered safety chain.
struct SafetyRule {
    reason: &'static str,
    guard: fn(&TechniqueSelectorConfig, &TechContext) -> bool,
    pool: fn(&TechniqueSelectorConfig) -> &[Technique],
}

/// The safety chain, highest priority first. Falling through every guard
/// hands the decision to the segment/tempo chain.
const SAFETY_CHAIN: [SafetyRule; 4] = [
    SafetyRule {
        reason: "safety:simple_head_tail forced",
        guard: |_, ctx| ctx.simple_head_tail,
        pool: |_| &[Technique::SimpleHeadTail],
    },
    SafetyRule {
        reason: "safety:link unstable, conservative pool",
        guard: |cfg, ctx| ctx.dropout_rate > cfg.dropout_max || ctx.recent_errors > 0,
        pool: |cfg| &cfg.conservative,
    },
    SafetyRule {
        reason: "safety:vocals present, vocal-safe pool",
        guard: |cfg, ctx| ctx.vocality > cfg.vocality_max,
        pool: |cfg| &cfg.vocal_safe,
    },
    SafetyRule {
        reason: "safety:key clash, simple pool",
        guard: |_, ctx| !key_compatible(ctx.key_from.as_deref(), ctx.key_to.as_deref()),
        pool: |cfg| &cfg.key_clash,
    },
];

/// Chooses a transition technique for each track change.
#[derive(Debug, Clone)]
pub struct TechniqueSelector {
    cfg: TechniqueSelectorConfig,
}

impl TechniqueSelector {
    /// Build a selector, rejecting unsatisfiable whitelists.
    pub fn new(cfg: TechniqueSelectorConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// Pick a technique for the given context.
    pub fn choose(&self, ctx: &TechContext, rng: &mut EngineRng) -> TechniqueDecision {
        for rule in &SAFETY_CHAIN {
            if (rule.guard)(&self.cfg, ctx) {
                let pool = (rule.pool)(&self.cfg);
                // validate() guarantees a non-empty pool
                let technique = rng
                    .choose(pool)
                    .copied()
                    .unwrap_or(Technique::SimpleHeadTail);
                debug!(technique = technique.as_str(), rule = rule.reason, "safety gate fired");
                return TechniqueDecision::new(technique, vec![rule.reason.to_string()]);
            }
        }

        let mut reasons = Vec::new();
        let bpm_to = ctx.bpm_to.unwrap_or(0.0);
        let compatible = key_compatible(ctx.key_from.as_deref(), ctx.key_to.as_deref());
        let base = match ctx.segment {
            Some(Segment::Drop) => {
                if bpm_to >= 140.0 && compatible {
                    reasons.push("segment:drop fast compatible, double_drop_32".to_string());
                    Technique::DoubleDrop32
                } else if bpm_to >= 130.0 {
                    reasons.push("segment:drop, phrase_cut_16".to_string());
                    Technique::PhraseCut16
                } else {
                    reasons.push("segment:drop slow, phrase_cut_32".to_string());
                    Technique::PhraseCut32
                }
            }
            Some(Segment::Build) => {
                if bpm_to >= 130.0 {
                    reasons.push("segment:build fast, build_up_16".to_string());
                    Technique::BuildUp16
                } else {
                    reasons.push("segment:build, build_up_32".to_string());
                    Technique::BuildUp32
                }
            }
            Some(Segment::Fill) => {
                reasons.push("segment:fill, fill_bridge_8".to_string());
                Technique::FillBridge8
            }
            _ => {
                if bpm_to >= 140.0 {
                    reasons.push("segment:steady fast, phrase_cut_16".to_string());
                    Technique::PhraseCut16
                } else if bpm_to >= 120.0 {
                    reasons.push("segment:steady, long_layer_24".to_string());
                    Technique::LongLayer24
                } else {
                    reasons.push("segment:steady slow, long_layer_32".to_string());
                    Technique::LongLayer32
                }
            }
        };

        self.bias_by_mood(TechniqueDecision::new(base, reasons), ctx, compatible)
    }

    /// Lowest-priority adjustment: mood may swap between techniques of
    /// similar safety, never relax a gate that already fired.
    fn bias_by_mood(
        &self,
        base: TechniqueDecision,
        ctx: &TechContext,
        compatible: bool,
    ) -> TechniqueDecision {
        let Some(mood) = &ctx.emotion else {
            return base;
        };
        let mut reason = base.reason.clone();

        if mood.arousal >= 0.7
            && matches!(base.technique, Technique::LongLayer24 | Technique::LongLayer32)
        {
            reason.push("mood:arousal high, prefer phrase cut".to_string());
            return TechniqueDecision::new(Technique::PhraseCut16, reason);
        }

        if mood.energy <= 0.35 && base.technique == Technique::PhraseCut16 {
            reason.push("mood:energy low, prefer long layer".to_string());
            return TechniqueDecision::new(Technique::LongLayer24, reason);
        }

        if mood.valence >= 0.2
            && ctx.segment == Some(Segment::Drop)
            && compatible
            && ctx.bpm_to.unwrap_or(0.0) >= 138.0
            && base.technique != Technique::DoubleDrop32
        {
            reason.push("mood:valence high on drop, double_drop_32".to_string());
            return TechniqueDecision::new(Technique::DoubleDrop32, reason);
        }

        if (mood.valence <= -0.2 || ctx.vocality > self.cfg.vocality_max)
            && matches!(
                base.technique,
                Technique::BackspinSafe | Technique::BrakeFx | Technique::StutterGate
            )
        {
            reason.push("mood:valence low or vocal, safer cross".to_string());
            return TechniqueDecision::new(Technique::MidScoopCross, reason);
        }

        base
    }
}
