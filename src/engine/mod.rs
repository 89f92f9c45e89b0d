pub mod channel;
pub mod dsp;
pub mod envelope;
pub mod filter;
pub mod generator;
pub mod governor;
pub mod lfo;
pub mod modulator;
pub mod oscillator;
pub mod synth;
pub mod units;
pub mod voice;
