// Contracts for the collaborators that feed the engine: preset resolution,
// sample data, and per-program tuning overrides. The engine never parses
// bank files itself; a host hands it anything implementing these traits.

use std::sync::Arc;

use crate::engine::generator::{default_generators, GEN_COUNT};
use crate::engine::modulator::Modulator;

/// Immutable sample data, shared across every voice that references it.
#[derive(Debug, Clone)]
pub struct SampleData {
    pub frames: Arc<[f32]>,
    pub sample_rate: f32,
    pub root_key: u8,
    /// Cents of correction applied on top of the root key.
    pub pitch_correction: i16,
    pub loop_start: u32,
    pub loop_end: u32,
}

impl SampleData {
    pub fn new(
        frames: Vec<f32>,
        sample_rate: f32,
        root_key: u8,
        pitch_correction: i16,
        loop_start: u32,
        loop_end: u32,
    ) -> Self {
        Self {
            frames: frames.into(),
            sample_rate,
            root_key,
            pitch_correction,
            loop_start,
            loop_end,
        }
    }
}

/// One sample layer resolved for a (key, velocity) pair: the sample plus the
/// fully summed zone generators and the zone's modulator list. Templates are
/// immutable; voices copy the mutable parts out at note-on.
#[derive(Debug, Clone)]
pub struct VoiceTemplate {
    pub sample: Arc<SampleData>,
    pub generators: [i16; GEN_COUNT],
    pub modulators: Vec<Modulator>,
}

/// A resolved preset. `id` keys the voice-prototype cache, so two presets
/// that can return different templates must not share an id.
pub trait PresetSource: Send + Sync {
    fn id(&self) -> u32;

    /// All sample layers sounding for this (key, velocity). An empty vec
    /// means the pair maps to nothing (outside every zone's ranges).
    fn voice_parameters(&self, key: u8, velocity: u8) -> Vec<VoiceTemplate>;

    fn name(&self) -> &str {
        ""
    }
}

/// The bank behind program changes.
pub trait BankSource: Send + Sync {
    fn preset(&self, bank: u8, program: u8) -> Option<Arc<dyn PresetSource>>;
}

/// Optional per-program key tuning override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyTuning {
    /// The key actually played.
    pub key: u8,
    /// Additional fractional detune in cents.
    pub cents: f32,
}

pub trait TuningSource: Send + Sync {
    /// Override for (program, key), or None to play the key as-is.
    fn tuning(&self, program: u8, key: u8) -> Option<KeyTuning>;
}

/// Stand-in preset used when no bank is loaded or a program resolves to
/// nothing. Produces no voices, so the channel stays silent but alive.
#[derive(Debug)]
pub struct EmptyPreset;

impl PresetSource for EmptyPreset {
    fn id(&self) -> u32 {
        u32::MAX
    }

    fn voice_parameters(&self, _key: u8, _velocity: u8) -> Vec<VoiceTemplate> {
        Vec::new()
    }

    fn name(&self) -> &str {
        "(empty)"
    }
}

impl VoiceTemplate {
    /// Template with default generators, handy for tests and hosts that
    /// build zones programmatically.
    pub fn from_sample(sample: Arc<SampleData>) -> Self {
        Self {
            sample,
            generators: default_generators(),
            modulators: Vec::new(),
        }
    }
}
