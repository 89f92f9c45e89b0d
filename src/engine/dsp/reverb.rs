// Dattorro-topology plate reverb: pre-delay and one-pole pre-filter into a
// four-stage input diffuser, then a figure-eight tank of two all-pass/delay
// halves cross-feeding each other. Stereo output is mixed down from seven
// fixed taps per side. The two first-stage tank all-passes get a slow LFO
// "excursion" on their read position (cubic-interpolated) for subtle pitch
// wobble. A "character" mode swaps the whole tank for a single feedback
// echo line.
//
// Every property setter feeds recalculate(); nothing is derived implicitly.

use crate::engine::dsp::{AllpassDelay, DelayLine, OnePoleLp};

/// The tank constants are expressed at the paper's 29761 Hz reference rate
/// and scaled to the actual rate at construction.
const REFERENCE_RATE: f32 = 29_761.0;

const INPUT_DIFFUSION: [usize; 4] = [142, 107, 379, 277];
const TANK_AP1: [usize; 2] = [672, 908];
const TANK_DELAY1: [usize; 2] = [4453, 4217];
const TANK_AP2: [usize; 2] = [1800, 2656];
const TANK_DELAY2: [usize; 2] = [3720, 3163];
const PRE_DELAY_MAX: usize = 4800;
const EXCURSION_SAMPLES: f32 = 16.0;

// Output tap positions, left then right, per the published topology.
const TAPS_LEFT: [usize; 7] = [266, 2974, 1913, 1996, 1990, 187, 1066];
const TAPS_RIGHT: [usize; 7] = [353, 3627, 1228, 2673, 2111, 335, 121];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbCharacter {
    /// Full plate tank.
    Plate,
    /// Single feedback delay line, a plain echo.
    Echo,
}

pub struct Reverb {
    sample_rate: f32,
    scale: f32,

    pre_delay: DelayLine,
    pre_filter: OnePoleLp,
    input_diffusers: [AllpassDelay; 4],

    tank_ap1: [AllpassDelay; 2],
    tank_delay1: [DelayLine; 2],
    tank_damp: [OnePoleLp; 2],
    tank_ap2: [AllpassDelay; 2],
    tank_delay2: [DelayLine; 2],

    echo_line: DelayLine,

    lfo_phase: f32,
    lfo_increment: f32,

    // Host-facing properties; setters recalculate the derived fields below
    time: f32,
    damping: f32,
    pre_delay_ms: f32,
    level: f32,
    character: ReverbCharacter,

    decay: f32,
    pre_delay_samples: f32,
    echo_delay: f32,
    echo_feedback: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let scale = sample_rate / REFERENCE_RATE;
        let s = |n: usize| ((n as f32 * scale) as usize).max(1);
        let mut r = Self {
            sample_rate,
            scale,
            pre_delay: DelayLine::new(s(PRE_DELAY_MAX) + 4),
            pre_filter: OnePoleLp::new(0.95),
            input_diffusers: [
                AllpassDelay::new(s(INPUT_DIFFUSION[0]), 0.75),
                AllpassDelay::new(s(INPUT_DIFFUSION[1]), 0.75),
                AllpassDelay::new(s(INPUT_DIFFUSION[2]), 0.625),
                AllpassDelay::new(s(INPUT_DIFFUSION[3]), 0.625),
            ],
            tank_ap1: [
                AllpassDelay::new(s(TANK_AP1[0]), 0.7),
                AllpassDelay::new(s(TANK_AP1[1]), 0.7),
            ],
            tank_delay1: [
                DelayLine::new(s(TANK_DELAY1[0]) + 4),
                DelayLine::new(s(TANK_DELAY1[1]) + 4),
            ],
            tank_damp: [OnePoleLp::new(0.7), OnePoleLp::new(0.7)],
            tank_ap2: [
                AllpassDelay::new(s(TANK_AP2[0]), 0.5),
                AllpassDelay::new(s(TANK_AP2[1]), 0.5),
            ],
            tank_delay2: [
                DelayLine::new(s(TANK_DELAY2[0]) + 4),
                DelayLine::new(s(TANK_DELAY2[1]) + 4),
            ],
            echo_line: DelayLine::new((sample_rate * 1.5) as usize),
            lfo_phase: 0.0,
            lfo_increment: 0.8 / sample_rate,
            time: 2.0,
            damping: 0.4,
            pre_delay_ms: 20.0,
            level: 0.8,
            character: ReverbCharacter::Plate,
            decay: 0.0,
            pre_delay_samples: 0.0,
            echo_delay: 1.0,
            echo_feedback: 0.0,
        };
        r.recalculate();
        r
    }

    /// Decay time in seconds, roughly RT60.
    pub fn set_time(&mut self, seconds: f32) {
        self.time = seconds.clamp(0.1, 30.0);
        self.recalculate();
    }

    /// High-frequency damping inside the tank, 0 (bright) to 1 (dark).
    pub fn set_damping(&mut self, amount: f32) {
        self.damping = amount.clamp(0.0, 1.0);
        self.recalculate();
    }

    pub fn set_pre_delay(&mut self, ms: f32) {
        self.pre_delay_ms = ms.max(0.0);
        self.recalculate();
    }

    /// Output level, linear.
    pub fn set_level(&mut self, level: f32) {
        self.level = level.clamp(0.0, 2.0);
    }

    pub fn set_character(&mut self, character: ReverbCharacter) {
        self.character = character;
        self.recalculate();
    }

    fn recalculate(&mut self) {
        // One circulation of a tank half, for mapping the requested RT60
        // onto a per-circulation gain
        let circuit: usize = TANK_AP1
            .iter()
            .chain(TANK_DELAY1.iter())
            .chain(TANK_AP2.iter())
            .chain(TANK_DELAY2.iter())
            .sum();
        let circuit_seconds = circuit as f32 * self.scale / self.sample_rate / 2.0;
        self.decay = 0.001_f32
            .powf(circuit_seconds / self.time)
            .clamp(0.0, 0.96);
        let damp_coeff = 1.0 - self.damping * 0.8;
        for d in &mut self.tank_damp {
            d.set_coeff(damp_coeff);
        }
        let max_pre = (self.pre_delay.len_samples() - 4) as f32;
        self.pre_delay_samples = (self.pre_delay_ms * 0.001 * self.sample_rate).min(max_pre);

        self.echo_delay = (self.time * 0.08 * self.sample_rate)
            .clamp(1.0, self.echo_line.len_samples() as f32 - 4.0);
        self.echo_feedback = self.decay * 0.7;
    }

    /// Consume the stereo send bus and add the wet signal into the outputs.
    pub fn process_block(
        &mut self,
        in_l: &[f32],
        in_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) {
        match self.character {
            ReverbCharacter::Plate => self.process_plate(in_l, in_r, out_l, out_r),
            ReverbCharacter::Echo => self.process_echo(in_l, in_r, out_l, out_r),
        }
    }

    fn process_plate(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        let s = self.scale;
        let tap = |n: usize| -> f32 { (n as f32 * s).max(1.0) };
        for i in 0..in_l.len() {
            let x = (in_l[i] + in_r[i]) * 0.5;

            self.pre_delay.write(x);
            let mut v = self.pre_delay.tap_lerp(self.pre_delay_samples);
            v = self.pre_filter.tick(v);
            for ap in &mut self.input_diffusers {
                v = ap.tick(v);
            }

            let excursion =
                (self.lfo_phase * std::f32::consts::TAU).sin() * EXCURSION_SAMPLES * s;
            self.lfo_phase = (self.lfo_phase + self.lfo_increment).fract();

            // Cross-feedback: each half is fed by the other half's tail
            let feed_l = v + self.tank_delay2[1].tap_lerp(tap(TANK_DELAY2[1]) - 2.0) * self.decay;
            let feed_r = v + self.tank_delay2[0].tap_lerp(tap(TANK_DELAY2[0]) - 2.0) * self.decay;

            let mut tl = self.tank_ap1[0].tick_modulated(feed_l, excursion);
            self.tank_delay1[0].write(tl);
            tl = self.tank_damp[0].tick(self.tank_delay1[0].tap_lerp(tap(TANK_DELAY1[0]) - 2.0));
            tl = self.tank_ap2[0].tick(tl * self.decay);
            self.tank_delay2[0].write(tl);

            let mut tr = self.tank_ap1[1].tick_modulated(feed_r, -excursion);
            self.tank_delay1[1].write(tr);
            tr = self.tank_damp[1].tick(self.tank_delay1[1].tap_lerp(tap(TANK_DELAY1[1]) - 2.0));
            tr = self.tank_ap2[1].tick(tr * self.decay);
            self.tank_delay2[1].write(tr);

            // Seven taps a side; opposite-half taps carry positive sign
            let yl = self.tank_delay1[1].tap_lerp(tap(TAPS_LEFT[0]))
                + self.tank_delay1[1].tap_lerp(tap(TAPS_LEFT[1]))
                - self.tank_ap2[1].interior_tap(tap(TAPS_LEFT[2]) as usize)
                + self.tank_delay2[1].tap_lerp(tap(TAPS_LEFT[3]))
                - self.tank_delay1[0].tap_lerp(tap(TAPS_LEFT[4]))
                - self.tank_ap2[0].interior_tap(tap(TAPS_LEFT[5]) as usize)
                - self.tank_delay2[0].tap_lerp(tap(TAPS_LEFT[6]));
            let yr = self.tank_delay1[0].tap_lerp(tap(TAPS_RIGHT[0]))
                + self.tank_delay1[0].tap_lerp(tap(TAPS_RIGHT[1]))
                - self.tank_ap2[0].interior_tap(tap(TAPS_RIGHT[2]) as usize)
                + self.tank_delay2[0].tap_lerp(tap(TAPS_RIGHT[3]))
                - self.tank_delay1[1].tap_lerp(tap(TAPS_RIGHT[4]))
                - self.tank_ap2[1].interior_tap(tap(TAPS_RIGHT[5]) as usize)
                - self.tank_delay2[1].tap_lerp(tap(TAPS_RIGHT[6]));

            out_l[i] += yl * 0.6 * self.level;
            out_r[i] += yr * 0.6 * self.level;
        }
    }

    fn process_echo(&mut self, in_l: &[f32], in_r: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        for i in 0..in_l.len() {
            let x = (in_l[i] + in_r[i]) * 0.5;
            let delayed = self.echo_line.tap_lerp(self.echo_delay);
            self.echo_line.write(x + delayed * self.echo_feedback);
            out_l[i] += delayed * self.level;
            out_r[i] += delayed * self.level;
        }
    }

    pub fn reset(&mut self) {
        self.pre_delay.reset();
        self.pre_filter.reset();
        for ap in &mut self.input_diffusers {
            ap.reset();
        }
        for ap in self.tank_ap1.iter_mut().chain(self.tank_ap2.iter_mut()) {
            ap.reset();
        }
        for d in self
            .tank_delay1
            .iter_mut()
            .chain(self.tank_delay2.iter_mut())
        {
            d.reset();
        }
        for d in &mut self.tank_damp {
            d.reset();
        }
        self.echo_line.reset();
        self.lfo_phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    fn impulse_energy(r: &mut Reverb, blocks: usize) -> f32 {
        let mut energy = 0.0f32;
        for b in 0..blocks {
            let mut in_l = [0.0f32; 128];
            let mut in_r = [0.0f32; 128];
            if b == 0 {
                in_l[0] = 1.0;
                in_r[0] = 1.0;
            }
            let mut out_l = [0.0f32; 128];
            let mut out_r = [0.0f32; 128];
            r.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
            energy += out_l.iter().chain(out_r.iter()).map(|x| x * x).sum::<f32>();
            assert!(out_l.iter().all(|x| x.is_finite()));
        }
        energy
    }

    #[test]
    fn impulse_produces_decaying_tail() {
        let mut r = Reverb::new(SR);
        r.set_time(1.0);
        let early = impulse_energy(&mut r, 40);
        assert!(early > 0.0, "no reverb tail at all");
        let mut late = 0.0f32;
        for _ in 0..400 {
            let zeros = [0.0f32; 128];
            let mut out_l = [0.0f32; 128];
            let mut out_r = [0.0f32; 128];
            r.process_block(&zeros, &zeros, &mut out_l, &mut out_r);
            late = out_l.iter().fold(late, |m, x| m.max(x.abs()));
        }
        assert!(late < 0.5);
    }

    #[test]
    fn output_is_additive() {
        let mut r = Reverb::new(SR);
        let in_l = [0.5f32; 128];
        let in_r = [0.5f32; 128];
        let mut out_l = [1.0f32; 128];
        let mut out_r = [1.0f32; 128];
        r.process_block(&in_l, &in_r, &mut out_l, &mut out_r);
        let mut fresh = Reverb::new(SR);
        let mut ref_l = [0.0f32; 128];
        let mut ref_r = [0.0f32; 128];
        fresh.process_block(&in_l, &in_r, &mut ref_l, &mut ref_r);
        // The pre-existing 1.0 baseline must survive untouched
        for i in 0..128 {
            assert!((out_l[i] - 1.0 - ref_l[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn echo_character_repeats() {
        let mut r = Reverb::new(SR);
        r.set_character(ReverbCharacter::Echo);
        r.set_time(2.0);
        assert!(impulse_energy(&mut r, 200) > 0.0);
    }

    #[test]
    fn reset_silences_tail() {
        let mut r = Reverb::new(SR);
        impulse_energy(&mut r, 10);
        r.reset();
        let zeros = [0.0f32; 128];
        let mut out_l = [0.0f32; 128];
        let mut out_r = [0.0f32; 128];
        r.process_block(&zeros, &zeros, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&x| x == 0.0));
    }
}
