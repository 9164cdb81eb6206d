//! MoodFlow - command line simulation harness.
//!
//! Drives the orchestration engine with a synthetic set, logging every
//! pipeline rebuild and transition decision. Useful for eyeballing the
//! engine's behavior without a renderer or an audio device attached.

#![warn(missing_docs)]

use anyhow::{Context, Result};
use clap::Parser;
use moodflow_core::{
    compute_audio_features, Engine, EngineConfig, Mood, PerfSample, Preset, Segment, TechContext,
    TrackMetadata,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Simulated sample rate for the synthetic spectrum.
const SAMPLE_RATE: f32 = 48_000.0;

/// Spectrum bins fed to the feature extractor.
const SPECTRUM_BINS: usize = 512;

/// Command line options.
#[derive(Debug, Parser)]
#[command(name = "moodflow", about = "Mood-driven effect orchestration simulator")]
struct Cli {
    /// Salt mixed into the per-track seed
    #[arg(long, default_value_t = 114_514)]
    seed: u64,

    /// Number of engine ticks to simulate
    #[arg(long, default_value_t = 512)]
    ticks: u64,

    /// Milliseconds of simulated time per tick
    #[arg(long, default_value_t = 250.0)]
    tick_ms: f64,

    /// Tempo of the simulated tracks
    #[arg(long, default_value_t = 128.0)]
    bpm: f32,

    /// Ticks between simulated track changes
    #[arg(long, default_value_t = 160)]
    track_every: u64,

    /// Average frame time reported to the governor
    #[arg(long, default_value_t = 14.0)]
    frame_ms: f32,

    /// Optional preset catalogue (JSON array)
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Emit each rebuilt pipeline as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let presets = load_presets(cli.presets.as_deref())?;
    let cfg = EngineConfig {
        seed_salt: cli.seed,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(cfg).context("invalid engine configuration")?;

    info!(
        ticks = cli.ticks,
        bpm = cli.bpm,
        presets = presets.len(),
        "simulation starting"
    );

    let mut last_preset: Option<String> = None;
    let mut last_node_count = usize::MAX;

    for i in 0..cli.ticks {
        let now_ms = i as f64 * cli.tick_ms;
        let track_index = i / cli.track_every;
        let track = synth_track(track_index, cli.bpm, now_ms);

        if i > 0 && i % cli.track_every == 0 {
            let decision = engine.on_track_change(&transition_context(&track, now_ms));
            info!(
                technique = decision.technique.as_str(),
                reason = decision.reason.join("; "),
                "track change"
            );
        }

        let mood = synth_mood(now_ms);
        let spectrum = synth_spectrum(now_ms, cli.bpm);
        let beat = beat_confidence(now_ms, cli.bpm);
        let features = compute_audio_features(&spectrum, SAMPLE_RATE, beat);

        let pipeline = engine.tick(
            now_ms,
            &mood,
            &features,
            Some(&track),
            PerfSample {
                avg_frame_ms: cli.frame_ms,
            },
            &presets,
        );

        let rebuilt =
            pipeline.preset_id != last_preset || pipeline.nodes.len() != last_node_count;
        if rebuilt {
            if cli.json {
                println!("{}", serde_json::to_string(&pipeline)?);
            } else {
                let nodes: Vec<String> = pipeline
                    .nodes
                    .iter()
                    .map(|n| format!("{:?}:{:.3}", n.id, n.weight))
                    .collect();
                info!(
                    t_s = now_ms / 1000.0,
                    nodes = nodes.join(" "),
                    preset = pipeline.preset_id.as_deref().unwrap_or("-"),
                    ttl_s = pipeline.ttl_ms / 1000,
                    "pipeline"
                );
            }
            last_preset = pipeline.preset_id.clone();
            last_node_count = pipeline.nodes.len();
        }
    }

    info!("simulation finished");
    Ok(())
}

fn load_presets(path: Option<&std::path::Path>) -> Result<Vec<Preset>> {
    let Some(path) = path else {
        return Ok(builtin_presets());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading preset catalogue {}", path.display()))?;
    moodflow_core::presets::load_catalogue(&raw)
        .with_context(|| format!("parsing preset catalogue {}", path.display()))
}

fn builtin_presets() -> Vec<Preset> {
    // small default catalogue so the simulator has something to score
    let raw = r#"[
        {"id": "chrome-hall",  "tags": {"metalScore": 0.9, "specularBoost": 0.7, "hueShiftRisk": 0.2, "cost": 3.0, "energyBias": 0.8, "arousalBias": 0.6}},
        {"id": "liquid-floor", "tags": {"metalScore": 0.4, "rippleAffinity": 0.9, "flowAffinity": 0.8, "cost": 2.0, "valenceBias": 0.5}},
        {"id": "soft-dawn",    "tags": {"metalScore": 0.1, "cost": 1.0, "valenceBias": 0.8, "energyBias": -0.2}},
        {"id": "rust-cathedral", "tags": {"metalScore": 0.7, "fractureAffinity": 0.6, "hueShiftRisk": 0.5, "cost": 4.0, "arousalBias": 0.9}}
    ]"#;
    moodflow_core::presets::load_catalogue(raw).unwrap_or_default()
}

/// Phrase-aware track metadata for the simulated set.
fn synth_track(index: u64, bpm: f32, now_ms: f64) -> TrackMetadata {
    let keys = ["8A", "9A", "8B", "5A", "12A", "1A"];
    let segment = match (now_ms / 8_000.0) as u64 % 8 {
        5 => Segment::Build,
        6 => Segment::Fill,
        7 => Segment::Drop,
        _ => Segment::Steady,
    };
    TrackMetadata {
        track_id: Some(format!("sim-track-{index:03}")),
        bpm: Some(bpm + (index % 3) as f32 * 4.0),
        key_camelot: Some(keys[(index as usize) % keys.len()].to_string()),
        segment: Some(segment),
        started_at: Some(now_ms),
    }
}

fn transition_context(track: &TrackMetadata, now_ms: f64) -> TechContext {
    TechContext {
        bpm_from: track.bpm.map(|b| b - 2.0),
        bpm_to: track.bpm,
        key_from: Some("8A".to_string()),
        key_to: track.key_camelot.clone(),
        segment: track.segment,
        vocality: if (now_ms as u64 / 40_000) % 3 == 0 {
            0.4
        } else {
            0.0
        },
        simple_head_tail: false,
        dropout_rate: 0.0,
        recent_errors: 0,
        emotion: Some(synth_mood(now_ms)),
    }
}

/// Slow sinusoidal mood drift so every engine path gets exercised.
fn synth_mood(now_ms: f64) -> Mood {
    let t = now_ms / 1000.0;
    Mood {
        energy: (0.55 + 0.35 * (t / 37.0).sin()).clamp(0.0, 1.0) as f32,
        valence: (0.6 * (t / 53.0).sin()) as f32,
        arousal: (0.5 + 0.4 * (t / 23.0).cos()).clamp(0.0, 1.0) as f32,
    }
}

/// Beat confidence peaking on the simulated beat grid.
fn beat_confidence(now_ms: f64, bpm: f32) -> f32 {
    let beat_ms = 60_000.0 / bpm as f64;
    let phase = (now_ms % beat_ms) / beat_ms;
    if phase < 0.15 {
        0.9
    } else {
        0.1
    }
}

/// A plausible techno spectrum: heavy fundamentals, beat-synced kick
/// energy, slowly breathing highs.
fn synth_spectrum(now_ms: f64, bpm: f32) -> Vec<f32> {
    let t = now_ms / 1000.0;
    let kick = f64::from(beat_confidence(now_ms, bpm));
    (0..SPECTRUM_BINS)
        .map(|bin| {
            let hz = bin as f32 * (SAMPLE_RATE / 2.0) / SPECTRUM_BINS as f32;
            let floor = 0.05 + 0.3 / (1.0 + hz / 400.0);
            let low = if hz < 150.0 { 0.5 * kick as f32 } else { 0.0 };
            let shimmer = if hz > 2_500.0 {
                (0.2 + 0.2 * (t / 11.0).sin() as f32).max(0.0)
            } else {
                0.0
            };
            (floor + low + shimmer).clamp(0.0, 1.0)
        })
        .collect()
}
