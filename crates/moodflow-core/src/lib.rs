//! MoodFlow Core - Mood-driven effect orchestration
//!
//! This crate contains the audio-reactive engine that turns a continuously
//! changing emotional/audio/track signal into:
//! - a bounded, weighted set of visual-effect parameters for a shader
//!   pipeline (`EffectPipeline`), and
//! - a safety-prioritized transition decision for track changes
//!   (`TechniqueDecision`).
//!
//! The engine is single-threaded and tick-driven: one call to
//! [`Engine::tick`] per rendered frame. Rendering, UI, audio capture and
//! event transport live in collaborating crates and are out of scope here.

#![warn(missing_docs)]

pub mod audio_features;
pub mod beat_grid;
pub mod config;
pub mod drive;
pub mod governor;
pub mod history;
pub mod micro;
pub mod pipeline;
pub mod presets;
pub mod rng;
pub mod scheduler;
pub mod selector;
pub mod technique;

// --- Re-exports grouped by category ---

// Audio analysis
pub use audio_features::{compute_audio_features, AudioFeatures, SILENCE_RMS};

// Drive vector & track context
pub use beat_grid::StepState;
pub use drive::{unify, DriveVector, Mood, Segment, TrackMetadata};

// Pipeline model
pub use pipeline::{
    EffectId, EffectNode, EffectPipeline, Extras, FlowField, NodeCategory, PatternAlgo,
    TextureAlgo, UniformKey, UniformScope, NODE_WEIGHT_CAP,
};

// Scheduling
pub use config::{ConfigError, EngineConfig};
pub use governor::{GovernorConfig, PerfSample, PerfTier};
pub use presets::{Preset, PresetTags};
pub use scheduler::Engine;

// Transition techniques
pub use technique::{
    key_compatible, TechContext, Technique, TechniqueAction, TechniqueDecision, TechniqueHint,
    TechniqueSelector, TechniqueSelectorConfig,
};
