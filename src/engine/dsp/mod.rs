// Effect processors fed from the send buses, plus the delay-line and
// smoothing primitives they share. All processors follow the same contract:
// read an input bus, ADD the result into the provided stereo outputs, and
// expose reset().

pub mod chorus;
pub mod delay;
pub mod insertion;
pub mod reverb;

/// One-pole parameter smoother.
pub struct Smooth {
    pub y: f32,
    a: f32,
}

impl Smooth {
    pub fn new(sr: f32, ms: f32) -> Self {
        let a = (-1.0 / (ms * 0.001 * sr)).exp();
        Self { y: 0.0, a }
    }

    #[inline]
    pub fn next(&mut self, target: f32) -> f32 {
        self.y = self.a * self.y + (1.0 - self.a) * target;
        self.y
    }
}

/// One-pole low-pass used for damping inside feedback paths.
pub struct OnePoleLp {
    a: f32,
    y: f32,
}

impl OnePoleLp {
    pub fn new(a: f32) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            y: 0.0,
        }
    }

    #[inline]
    pub fn set_coeff(&mut self, a: f32) {
        self.a = a.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn tick(&mut self, x: f32) -> f32 {
        self.y += self.a * (x - self.y);
        self.y
    }

    pub fn reset(&mut self) {
        self.y = 0.0;
    }
}

/// Circular mono delay line with fractional reads.
pub struct DelayLine {
    buf: Vec<f32>,
    wr: usize,
}

impl DelayLine {
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0.0; len.max(4)],
            wr: 0,
        }
    }

    #[inline]
    pub fn len_samples(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn write(&mut self, x: f32) {
        self.buf[self.wr] = x;
        self.wr += 1;
        if self.wr >= self.buf.len() {
            self.wr = 0;
        }
    }

    /// Integer tap, `delay` samples behind the write head.
    #[inline]
    pub fn tap(&self, delay: usize) -> f32 {
        let len = self.buf.len();
        let idx = (self.wr + len - 1 - delay.min(len - 1)) % len;
        self.buf[idx]
    }

    #[inline]
    fn wrapped(&self, i: i64) -> f32 {
        let len = self.buf.len() as i64;
        self.buf[(((i % len) + len) % len) as usize]
    }

    /// Linear-interpolated fractional tap.
    #[inline]
    pub fn tap_lerp(&self, delay: f32) -> f32 {
        let pos = self.wr as f32 - 1.0 - delay;
        let i0 = pos.floor();
        let frac = pos - i0;
        let s0 = self.wrapped(i0 as i64);
        let s1 = self.wrapped(i0 as i64 + 1);
        s0 + (s1 - s0) * frac
    }

    /// Cubic-interpolated fractional tap, for modulated reads where linear
    /// interpolation would add zipper noise.
    #[inline]
    pub fn tap_cubic(&self, delay: f32) -> f32 {
        let pos = self.wr as f32 - 1.0 - delay;
        let i0 = pos.floor();
        let frac = pos - i0;
        let i = i0 as i64;
        crate::engine::oscillator::hermite(
            self.wrapped(i - 1),
            self.wrapped(i),
            self.wrapped(i + 1),
            self.wrapped(i + 2),
            frac,
        )
    }

    pub fn reset(&mut self) {
        self.buf.fill(0.0);
        self.wr = 0;
    }
}

/// Schroeder all-pass over a delay line, the diffusion building block of
/// the reverb tank.
pub struct AllpassDelay {
    line: DelayLine,
    delay: usize,
    pub gain: f32,
}

impl AllpassDelay {
    pub fn new(delay: usize, gain: f32) -> Self {
        // Headroom past the nominal delay so modulated reads never cross
        // the write head
        Self {
            line: DelayLine::new(delay + 64),
            delay,
            gain,
        }
    }

    #[inline]
    pub fn tick(&mut self, x: f32) -> f32 {
        let delayed = self.line.tap(self.delay);
        let input = x + delayed * self.gain;
        self.line.write(input);
        delayed - input * self.gain
    }

    /// Variant with a modulated (excursion) read position, cubic read.
    #[inline]
    pub fn tick_modulated(&mut self, x: f32, excursion: f32) -> f32 {
        let delayed = self.line.tap_cubic(self.delay as f32 + excursion);
        let input = x + delayed * self.gain;
        self.line.write(input);
        delayed - input * self.gain
    }

    /// Read an interior tap without advancing.
    #[inline]
    pub fn interior_tap(&self, delay: usize) -> f32 {
        self.line.tap(delay)
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_line_round_trip() {
        let mut dl = DelayLine::new(16);
        for i in 0..16 {
            dl.write(i as f32);
        }
        assert_eq!(dl.tap(0), 15.0);
        assert_eq!(dl.tap(5), 10.0);
    }

    #[test]
    fn fractional_tap_interpolates() {
        let mut dl = DelayLine::new(16);
        for i in 0..16 {
            dl.write(i as f32);
        }
        let v = dl.tap_lerp(4.5);
        assert!((v - 10.5).abs() < 1e-5);
    }

    #[test]
    fn allpass_is_stable() {
        let mut ap = AllpassDelay::new(142, 0.75);
        let mut peak = 0.0f32;
        for i in 0..10_000 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            peak = peak.max(ap.tick(x).abs());
        }
        assert!(peak.is_finite() && peak < 4.0);
    }

    #[test]
    fn smoother_converges() {
        let mut s = Smooth::new(48_000.0, 1.0);
        for _ in 0..2000 {
            s.next(1.0);
        }
        assert!((s.y - 1.0).abs() < 1e-3);
    }
}
