// Wavetable playback: walks a fractional cursor over shared sample frames
// and interpolates. All cursor math truncates toward zero; loop wrapping is
// modular so a single step may skip whole loop lengths without drifting.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bank::SampleData;
use crate::engine::generator::{Gen, GEN_COUNT};

/// Selectable per-synth interpolation quality. All modes read identically
/// when the playback step is exactly 1.0 and the cursor sits on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    Hermite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    None,
    Continuous,
    UntilRelease,
}

impl LoopMode {
    pub fn from_sample_modes(v: i16) -> Self {
        match v {
            1 => LoopMode::Continuous,
            3 => LoopMode::UntilRelease,
            _ => LoopMode::None,
        }
    }
}

/// Coarse address offsets move in 32768-sample units.
const COARSE_UNIT: i32 = 32_768;

/// Per-voice playback state over one shared sample.
#[derive(Debug, Clone)]
pub struct SampleState {
    pub data: Arc<SampleData>,
    pub cursor: f64,
    /// Frames of source advanced per output frame before momentary tuning.
    pub base_step: f64,
    pub loop_start: usize,
    pub loop_end: usize,
    /// Last readable frame index.
    pub end: usize,
    pub loop_mode: LoopMode,
    pub is_looping: bool,
}

impl SampleState {
    /// Build playback state from a sample and the voice's resolved
    /// generators, applying the five address-offset generators. The cursor
    /// and loop points are re-clamped into the sample afterwards; an
    /// inverted loop is swapped and a loop shorter than one sample
    /// disables looping.
    pub fn new(data: Arc<SampleData>, gens: &[i16; GEN_COUNT], output_rate: f32) -> Self {
        let last = data.frames.len().saturating_sub(1);
        let clamp = |v: i64| v.clamp(0, last as i64) as usize;

        let start = clamp(
            gens[Gen::StartAddrsOffset.idx()] as i64
                + gens[Gen::StartAddrsCoarseOffset.idx()] as i64 * COARSE_UNIT as i64,
        );
        let end = clamp(
            last as i64
                + gens[Gen::EndAddrsOffset.idx()] as i64
                + gens[Gen::EndAddrsCoarseOffset.idx()] as i64 * COARSE_UNIT as i64,
        );
        let mut loop_start = clamp(
            data.loop_start as i64
                + gens[Gen::StartLoopAddrsOffset.idx()] as i64
                + gens[Gen::StartLoopAddrsCoarseOffset.idx()] as i64 * COARSE_UNIT as i64,
        );
        let mut loop_end = clamp(
            data.loop_end as i64
                + gens[Gen::EndLoopAddrsOffset.idx()] as i64
                + gens[Gen::EndLoopAddrsCoarseOffset.idx()] as i64 * COARSE_UNIT as i64,
        );
        if loop_end < loop_start {
            std::mem::swap(&mut loop_start, &mut loop_end);
        }

        let mut loop_mode = LoopMode::from_sample_modes(gens[Gen::SampleModes.idx()]);
        if loop_end - loop_start < 1 {
            loop_mode = LoopMode::None;
        }
        let is_looping = loop_mode != LoopMode::None;

        Self {
            base_step: (data.sample_rate / output_rate) as f64,
            data,
            cursor: start as f64,
            loop_start,
            loop_end,
            end,
            loop_mode,
            is_looping,
        }
    }

    /// Loop-until-release samples stop looping once the voice releases.
    pub fn on_release(&mut self) {
        if self.loop_mode == LoopMode::UntilRelease {
            self.is_looping = false;
        }
    }

    #[inline]
    fn read(&self, idx: usize) -> f32 {
        // Lookahead indices past the loop seam wrap back into the loop;
        // past the sample end they clamp to the last frame.
        let idx = if self.is_looping && idx >= self.loop_end {
            self.loop_start + (idx - self.loop_end) % (self.loop_end - self.loop_start)
        } else {
            idx.min(self.end)
        };
        self.data.frames[idx]
    }

    /// Fill `out`, advancing the cursor by `step` frames per output frame.
    /// Returns true when a non-looping sample has been fully consumed; the
    /// remainder of `out` is zeroed in that case.
    pub fn render(&mut self, out: &mut [f32], step: f64, interp: Interpolation) -> bool {
        if self.data.frames.is_empty() {
            out.fill(0.0);
            return true;
        }
        let loop_len = (self.loop_end - self.loop_start) as f64;
        for (n, o) in out.iter_mut().enumerate() {
            if self.is_looping {
                if self.cursor >= self.loop_end as f64 {
                    let over = self.cursor - self.loop_start as f64;
                    self.cursor = self.loop_start as f64 + over % loop_len;
                }
            } else if self.cursor > self.end as f64 {
                for rest in &mut out[n..] {
                    *rest = 0.0;
                }
                return true;
            }

            // Explicit truncation toward zero; wrap above guarantees the
            // cursor is non-negative here.
            let i = self.cursor as usize;
            let frac = (self.cursor - i as f64) as f32;

            *o = match interp {
                Interpolation::Nearest => {
                    if frac >= 0.5 {
                        self.read(i + 1)
                    } else {
                        self.read(i)
                    }
                }
                Interpolation::Linear => {
                    let x0 = self.read(i);
                    let x1 = self.read(i + 1);
                    x0 + (x1 - x0) * frac
                }
                Interpolation::Hermite => {
                    let xm1 = self.read(i.saturating_sub(1));
                    let x0 = self.read(i);
                    let x1 = self.read(i + 1);
                    let x2 = self.read(i + 2);
                    hermite(xm1, x0, x1, x2, frac)
                }
            };

            self.cursor += step;
        }
        false
    }
}

/// 4-point cubic Hermite; frac = 0 returns x0 exactly.
#[inline]
pub fn hermite(xm1: f32, x0: f32, x1: f32, x2: f32, frac: f32) -> f32 {
    let c = (x1 - xm1) * 0.5;
    let v = x0 - x1;
    let w = c + v;
    let a = w + v + (x2 - x0) * 0.5;
    let b = w + a;
    ((a * frac - b) * frac + c) * frac + x0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generator::default_generators;

    fn ramp_sample(len: usize, loop_start: u32, loop_end: u32) -> Arc<SampleData> {
        let frames: Vec<f32> = (0..len).map(|i| i as f32).collect();
        Arc::new(SampleData::new(frames, 44_100.0, 60, 0, loop_start, loop_end))
    }

    fn state(data: Arc<SampleData>, sample_modes: i16) -> SampleState {
        let mut gens = default_generators();
        gens[Gen::SampleModes.idx()] = sample_modes;
        SampleState::new(data, &gens, 44_100.0)
    }

    #[test]
    fn loop_wraps_exactly_every_loop_length() {
        let mut s = state(ramp_sample(3000, 1000, 2000), 1);
        let mut out = vec![0.0f32; 5000];
        let finished = s.render(&mut out, 1.0, Interpolation::Linear);
        assert!(!finished);
        // Every read stays inside the sample
        assert!(out.iter().all(|&v| (0.0..3000.0).contains(&v)));
        // After entering the loop the ramp repeats with period 1000
        for n in 2000..4000 {
            assert_eq!(out[n], out[n + 1000], "at {n}");
        }
    }

    #[test]
    fn non_looping_finishes_and_zero_fills() {
        let mut s = state(ramp_sample(100, 0, 0), 0);
        let mut out = vec![1.0f32; 200];
        let finished = s.render(&mut out, 1.0, Interpolation::Linear);
        assert!(finished);
        assert!(out[150..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn modes_agree_at_unit_step() {
        for interp in [
            Interpolation::Nearest,
            Interpolation::Linear,
            Interpolation::Hermite,
        ] {
            let mut s = state(ramp_sample(512, 100, 400), 1);
            let mut out = vec![0.0f32; 256];
            s.render(&mut out, 1.0, interp);
            for (n, &v) in out.iter().enumerate() {
                assert_eq!(v, n as f32, "{interp:?} at {n}");
            }
        }
    }

    #[test]
    fn step_longer_than_loop_still_lands_inside() {
        let mut s = state(ramp_sample(3000, 1000, 1010), 1);
        let mut out = vec![0.0f32; 1000];
        s.render(&mut out, 37.5, Interpolation::Hermite);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(s.cursor < 1010.0 + 37.5);
    }

    #[test]
    fn empty_sample_finishes_immediately() {
        let mut s = state(ramp_sample(0, 0, 0), 1);
        let mut out = vec![1.0f32; 64];
        assert!(s.render(&mut out, 1.0, Interpolation::Hermite));
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn degenerate_loop_disables_looping() {
        let s = state(ramp_sample(100, 50, 50), 1);
        assert!(!s.is_looping);
    }

    #[test]
    fn release_ends_until_release_loop() {
        let mut s = state(ramp_sample(300, 100, 200), 3);
        assert!(s.is_looping);
        s.on_release();
        assert!(!s.is_looping);
        let mut out = vec![0.0f32; 400];
        assert!(s.render(&mut out, 1.0, Interpolation::Linear));
    }
}
