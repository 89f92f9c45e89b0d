// Multi-tap feedback delay. One control value picks the base time through
// the same breakpoint-table scheme the chorus uses; each tap reads at a
// fixed ratio of the base time, with the left and right channels on
// slightly different ratios so the taps never line up across the image.

use crate::engine::dsp::chorus::map_control;
use crate::engine::dsp::{DelayLine, Smooth};

/// Base time in ms per 0-127 control value.
const TIME_TABLE: [(u8, f32); 5] = [
    (0, 10.0),
    (30, 80.0),
    (70, 250.0),
    (110, 600.0),
    (127, 1000.0),
];

/// Tap positions as ratios of the base time with per-tap levels, left and
/// right read at different ratios.
const TAPS_LEFT: [(f32, f32); 3] = [(1.0, 0.9), (0.66, 0.5), (0.33, 0.3)];
const TAPS_RIGHT: [(f32, f32); 3] = [(0.75, 0.9), (0.5, 0.5), (0.25, 0.3)];

pub struct MultiTapDelay {
    sample_rate: f32,
    line_l: DelayLine,
    line_r: DelayLine,

    time_control: u8,
    feedback: f32,
    level: f32,

    base_samples: f32,
    // Time and feedback glide toward their targets per sample; a jump in
    // the tap position clicks
    time_smooth: Smooth,
    fb_smooth: Smooth,
}

impl MultiTapDelay {
    pub fn new(sample_rate: f32) -> Self {
        let len = (sample_rate * 1.1) as usize;
        let mut d = Self {
            sample_rate,
            line_l: DelayLine::new(len),
            line_r: DelayLine::new(len),
            time_control: 50,
            feedback: 0.3,
            level: 1.0,
            base_samples: 0.0,
            time_smooth: Smooth::new(sample_rate, 50.0),
            fb_smooth: Smooth::new(sample_rate, 20.0),
        };
        d.recalculate();
        d.time_smooth.y = d.base_samples;
        d.fb_smooth.y = d.feedback;
        d
    }

    pub fn set_time(&mut self, control: u8) {
        self.time_control = control.min(127);
        self.recalculate();
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 0.95);
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level.clamp(0.0, 2.0);
    }

    fn recalculate(&mut self) {
        let ms = map_control(&TIME_TABLE, self.time_control);
        let max = (self.line_l.len_samples() - 4) as f32;
        self.base_samples = (ms * 0.001 * self.sample_rate).min(max);
    }

    /// Consume the send bus and add the tap mix into the outputs.
    pub fn process_block(
        &mut self,
        in_l: &[f32],
        in_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) {
        for i in 0..in_l.len() {
            let base = self.time_smooth.next(self.base_samples);
            let feedback = self.fb_smooth.next(self.feedback);

            let mut yl = 0.0;
            for (ratio, gain) in TAPS_LEFT {
                yl += self.line_l.tap_lerp(base * ratio) * gain;
            }
            let mut yr = 0.0;
            for (ratio, gain) in TAPS_RIGHT {
                yr += self.line_r.tap_lerp(base * ratio) * gain;
            }

            // Feedback takes the longest tap only
            let fb_l = self.line_l.tap_lerp(base);
            let fb_r = self.line_r.tap_lerp(base * TAPS_RIGHT[0].0);
            self.line_l.write(in_l[i] + fb_l * feedback);
            self.line_r.write(in_r[i] + fb_r * feedback);

            out_l[i] += yl * self.level;
            out_r[i] += yr * self.level;
        }
    }

    pub fn reset(&mut self) {
        self.line_l.reset();
        self.line_r.reset();
        self.time_smooth.y = self.base_samples;
        self.fb_smooth.y = self.feedback;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_yields_multiple_taps() {
        let mut d = MultiTapDelay::new(44_100.0);
        d.set_time(30); // 80 ms base
        d.set_feedback(0.0);
        d.reset(); // snap the smoothers to the configured values
        let n = 44_100 / 10;
        let mut in_l = vec![0.0f32; n];
        in_l[0] = 1.0;
        let in_r = in_l.clone();
        let mut out_l = vec![0.0f32; n];
        let mut out_r = vec![0.0f32; n];
        d.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        let peaks = out_l.iter().filter(|x| x.abs() > 0.1).count();
        assert!(peaks >= 3, "expected three taps, saw {peaks} peaks");
    }

    #[test]
    fn channels_use_different_ratios() {
        let mut d = MultiTapDelay::new(44_100.0);
        d.set_time(30);
        d.set_feedback(0.0);
        d.reset();
        let n = 44_100 / 10;
        let mut in_l = vec![0.0f32; n];
        in_l[0] = 1.0;
        let in_r = in_l.clone();
        let mut out_l = vec![0.0f32; n];
        let mut out_r = vec![0.0f32; n];
        d.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        let first_l = out_l.iter().position(|x| x.abs() > 0.1);
        let first_r = out_r.iter().position(|x| x.abs() > 0.1);
        assert_ne!(first_l, first_r);
    }

    #[test]
    fn time_changes_glide_instead_of_jumping() {
        let mut d = MultiTapDelay::new(44_100.0);
        d.set_time(30); // 80 ms
        d.set_feedback(0.0);
        d.reset();
        let mut l = vec![0.0f32; 1];
        let mut r = vec![0.0f32; 1];
        d.process_block(&[1.0], &[1.0], &mut l, &mut r);
        d.set_time(0); // 10 ms target
        let n = 4410;
        let zeros = vec![0.0f32; n];
        let mut out_l = vec![0.0f32; n];
        let mut out_r = vec![0.0f32; n];
        d.process_block(&zeros, &zeros, &mut out_l, &mut out_r);
        // The read position glides, so nothing lands at the new 10 ms mark
        assert!(
            out_l[..600].iter().all(|x| x.abs() < 1e-3),
            "tap jumped straight to the new time"
        );
        assert!(out_l.iter().any(|x| x.abs() > 0.02), "echo never arrived");
    }

    #[test]
    fn feedback_decays() {
        let mut d = MultiTapDelay::new(44_100.0);
        d.set_time(10);
        d.set_feedback(0.5);
        d.reset();
        let mut in_l = vec![0.0f32; 4096];
        in_l[0] = 1.0;
        let in_r = in_l.clone();
        let mut out_l = vec![0.0f32; 4096];
        let mut out_r = vec![0.0f32; 4096];
        d.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        let zeros = vec![0.0f32; 4096];
        let mut peak = 1.0f32;
        for _ in 0..40 {
            let mut l = vec![0.0f32; 4096];
            let mut r = vec![0.0f32; 4096];
            d.process_block(&zeros, &zeros, &mut l, &mut r);
            let p = l.iter().fold(0.0f32, |m, x| m.max(x.abs()));
            assert!(p <= peak + 1e-3);
            peak = p;
        }
        assert!(peak < 0.1);
    }
}
