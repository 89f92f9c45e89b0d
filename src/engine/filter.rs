// Per-voice second-order resonant low-pass.
//
// Cutoff arrives in absolute cents and resonance in centibels, both
// integer-quantized musical values, so the derived biquad coefficients are
// cached process-wide in a map keyed by (resonance, cutoff, rate). Writes are
// idempotent per key, which keeps the shared cache safe across voices and
// channels. The cutoff target is smoothed a little every block to hide the
// stepping of coarse-grained modulation updates; LFO and envelope excursions
// are already continuous and are applied unsmoothed on top.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use super::units::abs_cents_to_hz;

/// Fully-open cutoff; at this ceiling with zero resonance the filter is a
/// pass-through and per-sample work is skipped entirely.
pub const FC_OPEN_CENTS: i16 = 13_500;

/// Per-block exponential smoothing factor for the cutoff target.
const CUTOFF_SMOOTH: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

static COEFF_CACHE: Lazy<RwLock<HashMap<(i16, i16, u32), FilterCoeffs>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// RBJ low-pass coefficients for an integer (resonance cb, cutoff cents)
/// pair, with the SF2 gain compensation that keeps the passband level flat
/// as resonance rises.
fn compute_coeffs(resonance_cb: i16, cutoff_cents: i16, sample_rate: f32) -> FilterCoeffs {
    let fc = abs_cents_to_hz(cutoff_cents as i32).min(sample_rate * 0.45);
    // Centibels to a linear Q, minus the 3.01 dB SF2 subtracts so that
    // zero resonance means no peak at all
    let q_db = resonance_cb as f32 / 10.0 - 3.01;
    let q = 10.0_f32.powf(q_db / 20.0).max(0.001);
    let gain = 1.0 / q.sqrt();

    let w0 = 2.0 * PI * fc / sample_rate;
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * q);
    let a0 = 1.0 + alpha;

    FilterCoeffs {
        b0: gain * (1.0 - cos_w0) * 0.5 / a0,
        b1: gain * (1.0 - cos_w0) / a0,
        b2: gain * (1.0 - cos_w0) * 0.5 / a0,
        a1: -2.0 * cos_w0 / a0,
        a2: (1.0 - alpha) / a0,
    }
}

fn cached_coeffs(resonance_cb: i16, cutoff_cents: i16, sample_rate: f32) -> FilterCoeffs {
    // The rate is part of the key: engines at different rates coexist in
    // one process and must not share coefficients
    let key = (resonance_cb, cutoff_cents, sample_rate.to_bits());
    if let Ok(cache) = COEFF_CACHE.read() {
        if let Some(c) = cache.get(&key) {
            return *c;
        }
    }
    let c = compute_coeffs(resonance_cb, cutoff_cents, sample_rate);
    if let Ok(mut cache) = COEFF_CACHE.write() {
        cache.entry(key).or_insert(c);
    }
    c
}

#[derive(Debug, Clone)]
pub struct LowPassFilter {
    sample_rate: f32,
    current_cutoff_cents: f32,
    z1: f32,
    z2: f32,
}

impl LowPassFilter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            current_cutoff_cents: FC_OPEN_CENTS as f32,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
        self.current_cutoff_cents = FC_OPEN_CENTS as f32;
    }

    /// Filter one block in place. `target_cents` is the modulated cutoff
    /// generator (smoothed), `excursion_cents` the momentary LFO/envelope
    /// contribution (not smoothed), `resonance_cb` the modulated Q.
    pub fn process_block(
        &mut self,
        buf: &mut [f32],
        target_cents: i16,
        excursion_cents: f32,
        resonance_cb: i16,
    ) {
        self.current_cutoff_cents +=
            (target_cents as f32 - self.current_cutoff_cents) * CUTOFF_SMOOTH;

        let effective = (self.current_cutoff_cents + excursion_cents)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;

        // Common case: filter wide open, nothing to do
        if effective >= FC_OPEN_CENTS && resonance_cb <= 0 {
            return;
        }

        let c = cached_coeffs(resonance_cb, effective.clamp(1500, FC_OPEN_CENTS), self.sample_rate);
        // Transposed direct form II
        let mut z1 = self.z1;
        let mut z2 = self.z2;
        for s in buf.iter_mut() {
            let x = *s;
            let y = c.b0 * x + z1;
            z1 = c.b1 * x - c.a1 * y + z2;
            z2 = c.b2 * x - c.a2 * y;
            *s = y;
        }
        self.z1 = z1;
        self.z2 = z2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn white_block(len: usize) -> Vec<f32> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 * 2.328_306_4e-10) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn open_filter_is_identity() {
        let mut f = LowPassFilter::new(SR);
        let block = white_block(256);
        let mut out = block.clone();
        f.process_block(&mut out, FC_OPEN_CENTS, 0.0, 0);
        assert_eq!(out, block);
    }

    #[test]
    fn low_cutoff_attenuates_noise() {
        let mut f = LowPassFilter::new(SR);
        let block = white_block(4096);
        let mut out = block.clone();
        // Let the smoothing converge over several blocks
        for chunk in out.chunks_mut(256) {
            f.process_block(chunk, 3000, 0.0, 0);
        }
        let rms_in: f32 = block.iter().map(|x| x * x).sum::<f32>() / block.len() as f32;
        let rms_out: f32 = out.iter().map(|x| x * x).sum::<f32>() / out.len() as f32;
        assert!(rms_out < rms_in * 0.5, "in={rms_in} out={rms_out}");
    }

    #[test]
    fn cache_is_idempotent() {
        let a = cached_coeffs(100, 8000, SR);
        let b = cached_coeffs(100, 8000, SR);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_separates_sample_rates() {
        // Warm the cache at one rate, then ask at another
        let lo = cached_coeffs(0, 5000, SR);
        let hi = cached_coeffs(0, 5000, 2.0 * SR);
        assert_ne!(lo, hi);
        assert_eq!(hi, compute_coeffs(0, 5000, 2.0 * SR));
    }

    #[test]
    fn output_stays_finite_at_high_resonance() {
        let mut f = LowPassFilter::new(SR);
        let mut block = white_block(2048);
        for chunk in block.chunks_mut(128) {
            f.process_block(chunk, 5000, 0.0, 960);
        }
        assert!(block.iter().all(|x| x.is_finite()));
    }
}
