//! SoundFont2-compatible wavetable synthesis core.
//!
//! Feed MIDI-style channel events into a [`Synthesizer`] and pull stereo
//! audio out in fixed-size blocks. Preset resolution, sample loading and
//! sequencing live behind the traits in [`bank`]; this crate owns the voice
//! lifecycle, the generator/modulator engine, envelopes, filter, wavetable
//! oscillator, mixing and the bus effects.

pub mod bank;
pub mod engine;

pub use bank::{BankSource, KeyTuning, PresetSource, SampleData, TuningSource, VoiceTemplate};
pub use engine::oscillator::Interpolation;
pub use engine::synth::{SynthConfig, SynthError, SynthEvent, Synthesizer};
