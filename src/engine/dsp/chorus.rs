// Chorus: a feedback delay line whose read position is swept by two
// phase-offset sine LFOs, one per channel. The 0-127 control values map
// onto milliseconds and hertz through piecewise-linear breakpoint tables
// taken from the hardware units this emulates, not through a plain linear
// scale.

use crate::engine::dsp::DelayLine;

/// Piecewise-linear control map over (control value, unit value) points.
pub fn map_control(table: &[(u8, f32)], value: u8) -> f32 {
    let value = value.min(127);
    let mut prev = table[0];
    for &point in table {
        if value <= point.0 {
            if point.0 == prev.0 {
                return point.1;
            }
            let t = (value - prev.0) as f32 / (point.0 - prev.0) as f32;
            return prev.1 + (point.1 - prev.1) * t;
        }
        prev = point;
    }
    prev.1
}

/// Base delay in ms; steps get finer in the musically useful low range.
const DELAY_TABLE: [(u8, f32); 5] = [
    (0, 0.1),
    (20, 1.0),
    (60, 6.3),
    (100, 17.5),
    (127, 50.0),
];

/// Sweep rate in Hz.
const RATE_TABLE: [(u8, f32); 4] = [(0, 0.05), (40, 1.0), (90, 4.05), (127, 10.0)];

/// Sweep depth in ms.
const DEPTH_TABLE: [(u8, f32); 3] = [(0, 0.0), (64, 3.25), (127, 10.0)];

pub struct Chorus {
    sample_rate: f32,
    line_l: DelayLine,
    line_r: DelayLine,
    phase_l: f32,
    phase_r: f32,

    // 0-127 control values; setters recalculate the derived fields
    delay_control: u8,
    rate_control: u8,
    depth_control: u8,
    feedback: f32,
    level: f32,

    base_samples: f32,
    depth_samples: f32,
    increment: f32,
}

impl Chorus {
    pub fn new(sample_rate: f32) -> Self {
        // 50 ms base + 10 ms depth is the table ceiling
        let len = (sample_rate * 0.065) as usize;
        let mut c = Self {
            sample_rate,
            line_l: DelayLine::new(len),
            line_r: DelayLine::new(len),
            phase_l: 0.0,
            phase_r: 0.33,
            delay_control: 60,
            rate_control: 20,
            depth_control: 40,
            feedback: 0.2,
            level: 1.0,
            base_samples: 0.0,
            depth_samples: 0.0,
            increment: 0.0,
        };
        c.recalculate();
        c
    }

    pub fn set_delay(&mut self, control: u8) {
        self.delay_control = control.min(127);
        self.recalculate();
    }

    pub fn set_rate(&mut self, control: u8) {
        self.rate_control = control.min(127);
        self.recalculate();
    }

    pub fn set_depth(&mut self, control: u8) {
        self.depth_control = control.min(127);
        self.recalculate();
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 0.95);
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level.clamp(0.0, 2.0);
    }

    fn recalculate(&mut self) {
        let to_samples = |ms: f32| ms * 0.001 * self.sample_rate;
        self.base_samples = to_samples(map_control(&DELAY_TABLE, self.delay_control));
        self.depth_samples = to_samples(map_control(&DEPTH_TABLE, self.depth_control));
        self.increment = map_control(&RATE_TABLE, self.rate_control) / self.sample_rate;
        // Keep the swept read inside the buffer
        let max = (self.line_l.len_samples() - 4) as f32;
        if self.base_samples + self.depth_samples > max {
            self.depth_samples = (max - self.base_samples).max(0.0);
        }
    }

    /// Consume the send bus and add the wet signal into the outputs.
    pub fn process_block(
        &mut self,
        in_l: &[f32],
        in_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) {
        for i in 0..in_l.len() {
            let lfo_l = (self.phase_l * std::f32::consts::TAU).sin() * 0.5 + 0.5;
            let lfo_r = (self.phase_r * std::f32::consts::TAU).sin() * 0.5 + 0.5;
            self.phase_l = (self.phase_l + self.increment).fract();
            self.phase_r = (self.phase_r + self.increment).fract();

            let dl = self.base_samples + lfo_l * self.depth_samples;
            let dr = self.base_samples + lfo_r * self.depth_samples;
            let yl = self.line_l.tap_lerp(dl);
            let yr = self.line_r.tap_lerp(dr);

            self.line_l.write(in_l[i] + yl * self.feedback);
            self.line_r.write(in_r[i] + yr * self.feedback);

            out_l[i] += yl * self.level;
            out_r[i] += yr * self.level;
        }
    }

    pub fn reset(&mut self) {
        self.line_l.reset();
        self.line_r.reset();
        self.phase_l = 0.0;
        self.phase_r = 0.33;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_map_hits_anchors_and_interpolates() {
        assert!((map_control(&DELAY_TABLE, 0) - 0.1).abs() < 1e-6);
        assert!((map_control(&DELAY_TABLE, 127) - 50.0).abs() < 1e-6);
        // Midway between the (20, 1.0) and (60, 6.3) anchors
        let mid = map_control(&DELAY_TABLE, 40);
        assert!(mid > 1.0 && mid < 6.3);
        // Monotone over the whole range
        let mut last = -1.0;
        for v in 0..=127u8 {
            let x = map_control(&DELAY_TABLE, v);
            assert!(x >= last);
            last = x;
        }
    }

    #[test]
    fn wet_signal_appears_delayed() {
        let mut c = Chorus::new(44_100.0);
        c.set_delay(100);
        let mut out_l = vec![0.0f32; 4096];
        let mut out_r = vec![0.0f32; 4096];
        let mut in_l = vec![0.0f32; 4096];
        in_l[0] = 1.0;
        let in_r = in_l.clone();
        c.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        assert_eq!(out_l[0], 0.0);
        assert!(out_l.iter().any(|&x| x.abs() > 1e-4));
    }

    #[test]
    fn stays_finite_with_max_settings() {
        let mut c = Chorus::new(48_000.0);
        c.set_delay(127);
        c.set_rate(127);
        c.set_depth(127);
        c.set_feedback(0.95);
        let in_l = vec![0.5f32; 512];
        let in_r = vec![0.5f32; 512];
        let mut out_l = vec![0.0f32; 512];
        let mut out_r = vec![0.0f32; 512];
        for _ in 0..50 {
            c.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        }
        assert!(out_l.iter().all(|x| x.is_finite()));
    }
}
