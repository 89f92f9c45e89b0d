// Triangle LFO shared by voice vibrato and modulation. Starts at zero after
// the delay elapses and rises first, per the SF2 definition.

use super::units::{abs_cents_to_hz, timecents_to_seconds};

#[derive(Debug, Clone)]
pub struct Lfo {
    sample_rate: f32,
    phase: f32,
    increment: f32,
    delay_samples: u32,
    elapsed: u32,
}

impl Lfo {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            phase: 0.0,
            increment: 0.0,
            delay_samples: 0,
            elapsed: 0,
        }
    }

    /// Configure from the generator pair (delay timecents, frequency in
    /// absolute cents, 0 cents = 8.176 Hz).
    pub fn update(&mut self, delay_tc: i32, freq_cents: i32) {
        self.delay_samples =
            (timecents_to_seconds(delay_tc) * self.sample_rate).round().max(0.0) as u32;
        self.increment = abs_cents_to_hz(freq_cents) / self.sample_rate;
    }

    /// Advance one sample; returns -1..1.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.elapsed < self.delay_samples {
            self.elapsed += 1;
            return 0.0;
        }
        // Triangle rising from 0: phase 0..0.25 -> 0..1, 0.25..0.75 -> 1..-1
        let v = {
            let p = self.phase;
            if p < 0.25 {
                p * 4.0
            } else if p < 0.75 {
                2.0 - p * 4.0
            } else {
                p * 4.0 - 4.0
            }
        };
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        v
    }

    /// Block-rate variant: value at the current position, then advance the
    /// whole block at once. Pitch and filter excursions are sampled at this
    /// rate; the filter smooths its own target, so no per-sample LFO walk
    /// is needed.
    pub fn tick_block(&mut self, n: u32) -> f32 {
        if self.elapsed < self.delay_samples {
            self.elapsed += n.min(self.delay_samples - self.elapsed);
            return 0.0;
        }
        let p = self.phase;
        let v = if p < 0.25 {
            p * 4.0
        } else if p < 0.75 {
            2.0 - p * 4.0
        } else {
            p * 4.0 - 4.0
        };
        self.phase = (self.phase + self.increment * n as f32).fract();
        v
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.elapsed = 0;
    }
}
