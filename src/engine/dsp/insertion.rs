// Insertion effects sit on a stereo pair rather than a send bus. They are
// selected by a numeric effect-type code and expose a flat
// set_parameter(index, value) surface for control-surface updates. Like
// the bus effects they add into the output buffers.

use log::warn;

pub const EFFECT_PASS: u8 = 0;
pub const EFFECT_EQ: u8 = 1;
pub const EFFECT_PHASER: u8 = 2;

pub trait InsertionEffect: Send {
    /// Add the processed stereo pair into the outputs.
    fn process_block(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]);

    /// Live parameter update; out-of-range indices are ignored, values are
    /// clamped to the parameter's legal range.
    fn set_parameter(&mut self, index: usize, value: f32);

    fn reset(&mut self);
}

/// Unknown type codes fall back to a pass-through, never silence.
pub fn create_insertion(code: u8, sample_rate: f32) -> Box<dyn InsertionEffect> {
    match code {
        EFFECT_PASS => Box::new(Pass),
        EFFECT_EQ => Box::new(Eq4Band::new(sample_rate)),
        EFFECT_PHASER => Box::new(Phaser::new(sample_rate)),
        other => {
            warn!("unknown insertion effect type {other}, using pass-through");
            Box::new(Pass)
        }
    }
}

pub struct Pass;

impl InsertionEffect for Pass {
    fn process_block(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        for i in 0..in_l.len() {
            out_l[i] += in_l[i];
            out_r[i] += in_r[i];
        }
    }

    fn set_parameter(&mut self, _index: usize, _value: f32) {}

    fn reset(&mut self) {}
}

#[derive(Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    fn set_peaking(&mut self, sr: f32, freq: f32, q: f32, gain_db: f32) {
        if gain_db.abs() < 1e-3 {
            let (z1, z2) = (self.z1, self.z2);
            *self = Self::identity();
            self.z1 = z1;
            self.z2 = z2;
            return;
        }
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * (freq / sr).clamp(0.0, 0.49);
        let alpha = w0.sin() / (2.0 * q.max(0.1));
        let cosw0 = w0.cos();
        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = -2.0 * cosw0 / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = -2.0 * cosw0 / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    #[inline]
    fn tick(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

const EQ_BANDS: usize = 4;
const EQ_CENTERS: [f32; EQ_BANDS] = [100.0, 400.0, 1600.0, 6400.0];
const EQ_Q: f32 = 0.9;
const EQ_GAIN_RANGE_DB: f32 = 12.0;

/// Four cascaded peaking biquads per channel.
/// Parameters 0..3 are band gains in dB.
pub struct Eq4Band {
    sample_rate: f32,
    bands_l: [Biquad; EQ_BANDS],
    bands_r: [Biquad; EQ_BANDS],
    gains_db: [f32; EQ_BANDS],
}

impl Eq4Band {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            bands_l: [Biquad::identity(); EQ_BANDS],
            bands_r: [Biquad::identity(); EQ_BANDS],
            gains_db: [0.0; EQ_BANDS],
        }
    }
}

impl InsertionEffect for Eq4Band {
    fn process_block(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        for i in 0..in_l.len() {
            let mut l = in_l[i];
            let mut r = in_r[i];
            for b in 0..EQ_BANDS {
                l = self.bands_l[b].tick(l);
                r = self.bands_r[b].tick(r);
            }
            out_l[i] += l;
            out_r[i] += r;
        }
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        if index >= EQ_BANDS {
            return;
        }
        let db = value.clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB);
        self.gains_db[index] = db;
        self.bands_l[index].set_peaking(self.sample_rate, EQ_CENTERS[index], EQ_Q, db);
        self.bands_r[index].set_peaking(self.sample_rate, EQ_CENTERS[index], EQ_Q, db);
    }

    fn reset(&mut self) {
        for b in self.bands_l.iter_mut().chain(self.bands_r.iter_mut()) {
            b.reset();
        }
    }
}

/// First-order all-pass stage.
struct ApStage {
    a1: f32,
    zm1_l: f32,
    zm1_r: f32,
}

impl ApStage {
    fn new() -> Self {
        Self {
            a1: 0.0,
            zm1_l: 0.0,
            zm1_r: 0.0,
        }
    }

    #[inline]
    fn set_fc(&mut self, fc: f32, sr: f32) {
        // Clamp well under Nyquist; tan() blows up at the edge and a
        // non-finite coefficient would poison the whole chain
        let w = (std::f32::consts::PI * (fc / sr).clamp(1e-4, 0.45)).tan();
        self.a1 = ((1.0 - w) / (1.0 + w)).clamp(-0.999, 0.999);
    }

    #[inline]
    fn tick_l(&mut self, x: f32) -> f32 {
        let y = -self.a1 * x + self.zm1_l;
        self.zm1_l = x + self.a1 * y;
        y
    }

    #[inline]
    fn tick_r(&mut self, x: f32) -> f32 {
        let y = -self.a1 * x + self.zm1_r;
        self.zm1_r = x + self.a1 * y;
        y
    }
}

const PHASER_STAGES: usize = 6;
const PHASER_FC_LOW: f32 = 200.0;
const PHASER_FC_HIGH: f32 = 2400.0;

/// Cascaded first-order all-passes swept by a triangle LFO, with feedback
/// around the chain. Parameters: 0 rate Hz, 1 depth, 2 feedback, 3 mix.
pub struct Phaser {
    sample_rate: f32,
    stages: [ApStage; PHASER_STAGES],
    phase: f32,
    rate_hz: f32,
    depth: f32,
    feedback: f32,
    mix: f32,
    fb_l: f32,
    fb_r: f32,
}

impl Phaser {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            stages: std::array::from_fn(|_| ApStage::new()),
            phase: 0.0,
            rate_hz: 0.5,
            depth: 0.7,
            feedback: 0.3,
            mix: 0.5,
            fb_l: 0.0,
            fb_r: 0.0,
        }
    }

    #[inline]
    fn triangle(&self) -> f32 {
        let p = self.phase;
        if p < 0.5 {
            p * 2.0
        } else {
            2.0 - p * 2.0
        }
    }
}

impl InsertionEffect for Phaser {
    fn process_block(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        let dp = self.rate_hz / self.sample_rate;
        for i in 0..in_l.len() {
            let sweep = self.triangle() * self.depth;
            let fc = PHASER_FC_LOW + (PHASER_FC_HIGH - PHASER_FC_LOW) * sweep;
            for s in &mut self.stages {
                s.set_fc(fc, self.sample_rate);
            }
            self.phase = (self.phase + dp).fract();

            // Feedback input is clamped: at extreme resonance the loop can
            // otherwise run away
            let xl = in_l[i] + (self.fb_l * self.feedback).clamp(-2.0, 2.0);
            let xr = in_r[i] + (self.fb_r * self.feedback).clamp(-2.0, 2.0);
            let mut yl = xl;
            let mut yr = xr;
            for s in &mut self.stages {
                yl = s.tick_l(yl);
                yr = s.tick_r(yr);
            }
            self.fb_l = yl;
            self.fb_r = yr;

            out_l[i] += in_l[i] * (1.0 - self.mix) + yl * self.mix;
            out_r[i] += in_r[i] * (1.0 - self.mix) + yr * self.mix;
        }
    }

    fn set_parameter(&mut self, index: usize, value: f32) {
        match index {
            0 => self.rate_hz = value.clamp(0.01, 10.0),
            1 => self.depth = value.clamp(0.0, 1.0),
            2 => self.feedback = value.clamp(0.0, 0.9),
            3 => self.mix = value.clamp(0.0, 1.0),
            _ => {}
        }
    }

    fn reset(&mut self) {
        for s in &mut self.stages {
            s.zm1_l = 0.0;
            s.zm1_r = 0.0;
        }
        self.phase = 0.0;
        self.fb_l = 0.0;
        self.fb_r = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fx: &mut dyn InsertionEffect, blocks: usize) -> Vec<f32> {
        let mut state = 0xdead_beefu32;
        let mut all = Vec::new();
        for _ in 0..blocks {
            let input: Vec<f32> = (0..256)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state as f32 * 2.328_306_4e-10) * 2.0 - 1.0
                })
                .collect();
            let mut out_l = vec![0.0f32; 256];
            let mut out_r = vec![0.0f32; 256];
            fx.process_block(&input, &input, &mut out_l, &mut out_r);
            all.extend(out_l);
        }
        all
    }

    #[test]
    fn pass_is_identity() {
        let mut fx = Pass;
        let input = vec![0.25f32; 64];
        let mut out_l = vec![0.0f32; 64];
        let mut out_r = vec![0.0f32; 64];
        fx.process_block(&input, &input, &mut out_l, &mut out_r);
        assert_eq!(out_l, input);
    }

    #[test]
    fn unknown_code_falls_back_to_pass() {
        let mut fx = create_insertion(200, 44_100.0);
        let input = vec![0.5f32; 32];
        let mut out_l = vec![0.0f32; 32];
        let mut out_r = vec![0.0f32; 32];
        fx.process_block(&input, &input, &mut out_l, &mut out_r);
        assert_eq!(out_l, input);
    }

    #[test]
    fn eq_zero_gain_is_transparent() {
        let mut fx = Eq4Band::new(44_100.0);
        let out = run(&mut fx, 4);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn eq_boost_changes_signal() {
        let mut flat = Eq4Band::new(44_100.0);
        let mut boosted = Eq4Band::new(44_100.0);
        boosted.set_parameter(1, 12.0);
        let a = run(&mut flat, 2);
        let b = run(&mut boosted, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn eq_ignores_bad_band_index() {
        let mut fx = Eq4Band::new(44_100.0);
        fx.set_parameter(10, 12.0); // no panic, no effect
        let out = run(&mut fx, 1);
        assert!(out.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn phaser_output_stays_finite_at_extremes() {
        let mut fx = Phaser::new(44_100.0);
        fx.set_parameter(0, 10.0);
        fx.set_parameter(1, 1.0);
        fx.set_parameter(2, 0.9);
        fx.set_parameter(3, 1.0);
        let out = run(&mut fx, 40);
        assert!(out.iter().all(|x| x.is_finite()));
    }
}
