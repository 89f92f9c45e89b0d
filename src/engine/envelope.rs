// The two per-voice envelopes. Both are explicit phase state machines over
// Delay / Attack / Hold / Decay / Sustain with a terminal release.
//
// The volume envelope runs in decibel-attenuation space (100 dB is treated
// as silence) so a linear per-sample dB ramp, exponentiated at the end,
// gives a perceptually linear fade. The one exception is Attack, which the
// SF2 spec defines as a ramp linear in *gain*. The modulation envelope runs
// in a plain 0..1 depth domain with a convex attack curve.

use super::generator::{Gen, GeneratorSet};
use super::modulator::convex;
use super::units::{db_to_gain, timecents_to_seconds};

/// Attenuation treated as full silence; decay/release times in the generator
/// domain are defined as the time to traverse all of it.
pub const DB_SILENCE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvPhase {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
}

#[derive(Debug, Clone)]
pub struct VolumeEnvelope {
    sample_rate: f32,

    phase: EnvPhase,
    released: bool,
    finished: bool,
    pos: u32,

    delay_samples: u32,
    attack_samples: u32,
    hold_samples: u32,
    decay_samples: u32,
    sustain_db: f32,
    release_seconds: f32,

    attack_gain: f32,
    current_db: f32,

    release_start_db: f32,
    release_total: u32,
    release_pos: u32,
}

impl VolumeEnvelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            phase: EnvPhase::Delay,
            released: false,
            finished: false,
            pos: 0,
            delay_samples: 0,
            attack_samples: 0,
            hold_samples: 0,
            decay_samples: 0,
            sustain_db: 0.0,
            release_seconds: 0.0,
            attack_gain: 0.0,
            current_db: DB_SILENCE,
            release_start_db: DB_SILENCE,
            release_total: 1,
            release_pos: 0,
        }
    }

    /// Re-derive phase timings from the modulated generators. Hold and decay
    /// get the key-number-dependent timecent shift (generator timecents per
    /// key of distance from key 60) so envelope timing tracks the played key
    /// without touching the base generator.
    pub fn update(&mut self, gens: &GeneratorSet, key: u8) {
        let key_shift = 60 - key as i32;
        let to_samples = |tc: i32| -> u32 {
            let secs = timecents_to_seconds(tc);
            (secs * self.sample_rate).round().max(0.0) as u32
        };

        self.delay_samples = to_samples(gens.get(Gen::DelayVolEnv) as i32);
        self.attack_samples = to_samples(gens.get(Gen::AttackVolEnv) as i32);
        self.hold_samples = to_samples(
            gens.get(Gen::HoldVolEnv) as i32
                + gens.get(Gen::KeynumToVolEnvHold) as i32 * key_shift,
        );
        // Sustain is centibels of attenuation; past 100 dB it is just silence
        self.sustain_db = (gens.get(Gen::SustainVolEnv) as f32 / 10.0).clamp(0.0, DB_SILENCE);

        // decayVolEnv is the time to fall the full 100 dB; decaying only to
        // the sustain level takes the proportional share of it.
        let full_decay = timecents_to_seconds(
            gens.get(Gen::DecayVolEnv) as i32
                + gens.get(Gen::KeynumToVolEnvDecay) as i32 * key_shift,
        );
        let fraction = self.sustain_db / DB_SILENCE;
        self.decay_samples = (full_decay * fraction * self.sample_rate).round().max(0.0) as u32;

        self.release_seconds = timecents_to_seconds(gens.get(Gen::ReleaseVolEnv) as i32);
    }

    /// Enter release, capturing the current level as the ramp start no
    /// matter which phase was active. An in-progress attack is linear in
    /// gain, so its level is converted back to decibels first.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.release_start_db = self.current_attenuation();
        // Time to fall 100 dB, scaled by the span actually left to traverse
        let span = (DB_SILENCE - self.release_start_db).max(0.0) / DB_SILENCE;
        self.release_total = (self.release_seconds * span * self.sample_rate)
            .round()
            .max(1.0) as u32;
        self.release_pos = 0;
        self.released = true;
    }

    #[inline]
    fn current_attenuation(&self) -> f32 {
        match self.phase {
            EnvPhase::Delay => DB_SILENCE,
            EnvPhase::Attack => {
                if self.attack_gain <= 1e-5 {
                    DB_SILENCE
                } else {
                    (-20.0 * self.attack_gain.log10()).clamp(0.0, DB_SILENCE)
                }
            }
            EnvPhase::Hold => 0.0,
            EnvPhase::Decay | EnvPhase::Sustain => self.current_db.clamp(0.0, DB_SILENCE),
        }
    }

    /// Advance one sample and return the envelope gain (linear, 0..1).
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.finished {
            return 0.0;
        }
        if self.released {
            let progress = self.release_pos as f32 / self.release_total as f32;
            let db = self.release_start_db + (DB_SILENCE - self.release_start_db) * progress;
            self.release_pos += 1;
            if self.release_pos >= self.release_total || db >= DB_SILENCE - 0.1 {
                self.finished = true;
            }
            self.current_db = db.clamp(0.0, DB_SILENCE);
            return db_to_gain(self.current_db);
        }

        match self.phase {
            EnvPhase::Delay => {
                if self.pos >= self.delay_samples {
                    self.phase = EnvPhase::Attack;
                    self.pos = 0;
                    self.attack_gain = 0.0;
                    return self.next_sample();
                }
                self.pos += 1;
                self.current_db = DB_SILENCE;
                0.0
            }
            EnvPhase::Attack => {
                if self.pos >= self.attack_samples {
                    self.phase = EnvPhase::Hold;
                    self.pos = 0;
                    self.attack_gain = 1.0;
                    return self.next_sample();
                }
                self.attack_gain = self.pos as f32 / self.attack_samples as f32;
                self.pos += 1;
                self.attack_gain
            }
            EnvPhase::Hold => {
                if self.pos >= self.hold_samples {
                    self.phase = EnvPhase::Decay;
                    self.pos = 0;
                    self.current_db = 0.0;
                    return self.next_sample();
                }
                self.pos += 1;
                self.current_db = 0.0;
                1.0
            }
            EnvPhase::Decay => {
                if self.pos >= self.decay_samples || self.sustain_db <= 0.0 {
                    self.phase = EnvPhase::Sustain;
                    self.pos = 0;
                    self.current_db = self.sustain_db;
                    return self.next_sample();
                }
                let progress = self.pos as f32 / self.decay_samples as f32;
                self.current_db = self.sustain_db * progress;
                self.pos += 1;
                db_to_gain(self.current_db)
            }
            EnvPhase::Sustain => {
                self.current_db = self.sustain_db;
                if self.sustain_db >= DB_SILENCE {
                    return 0.0;
                }
                db_to_gain(self.current_db)
            }
        }
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.finished
    }

    #[inline]
    pub fn released(&self) -> bool {
        self.released
    }

    #[inline]
    pub fn phase(&self) -> EnvPhase {
        self.phase
    }

    /// Current attenuation in dB, for governor scoring.
    #[inline]
    pub fn attenuation_db(&self) -> f32 {
        if self.finished {
            DB_SILENCE
        } else {
            self.current_attenuation()
        }
    }

    /// Fraction of the pre-sustain phases already traversed, for governor
    /// scoring. 1.0 once sustain (or release) is reached.
    pub fn progress(&self) -> f32 {
        let total =
            (self.delay_samples + self.attack_samples + self.hold_samples + self.decay_samples)
                .max(1);
        if self.released || self.phase == EnvPhase::Sustain {
            return 1.0;
        }
        let done = match self.phase {
            EnvPhase::Delay => self.pos,
            EnvPhase::Attack => self.delay_samples + self.pos,
            EnvPhase::Hold => self.delay_samples + self.attack_samples + self.pos,
            EnvPhase::Decay => {
                self.delay_samples + self.attack_samples + self.hold_samples + self.pos
            }
            EnvPhase::Sustain => total,
        };
        (done as f32 / total as f32).min(1.0)
    }
}

/// The modulation envelope: same phase machine, 0..1 output, convex attack.
#[derive(Debug, Clone)]
pub struct ModulationEnvelope {
    sample_rate: f32,

    phase: EnvPhase,
    released: bool,
    pos: u32,

    delay_samples: u32,
    attack_samples: u32,
    hold_samples: u32,
    decay_samples: u32,
    sustain_level: f32,
    release_seconds: f32,

    value: f32,
    release_start: f32,
    release_total: u32,
    release_pos: u32,
}

impl ModulationEnvelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            phase: EnvPhase::Delay,
            released: false,
            pos: 0,
            delay_samples: 0,
            attack_samples: 0,
            hold_samples: 0,
            decay_samples: 0,
            sustain_level: 1.0,
            release_seconds: 0.0,
            value: 0.0,
            release_start: 0.0,
            release_total: 1,
            release_pos: 0,
        }
    }

    pub fn update(&mut self, gens: &GeneratorSet, key: u8) {
        let key_shift = 60 - key as i32;
        let to_samples = |tc: i32| -> u32 {
            (timecents_to_seconds(tc) * self.sample_rate).round().max(0.0) as u32
        };
        self.delay_samples = to_samples(gens.get(Gen::DelayModEnv) as i32);
        self.attack_samples = to_samples(gens.get(Gen::AttackModEnv) as i32);
        self.hold_samples = to_samples(
            gens.get(Gen::HoldModEnv) as i32
                + gens.get(Gen::KeynumToModEnvHold) as i32 * key_shift,
        );
        // sustainModEnv is in 0.1% units of decrease from full scale
        self.sustain_level = 1.0 - (gens.get(Gen::SustainModEnv) as f32 / 1000.0).clamp(0.0, 1.0);
        let full_decay = timecents_to_seconds(
            gens.get(Gen::DecayModEnv) as i32
                + gens.get(Gen::KeynumToModEnvDecay) as i32 * key_shift,
        );
        let fraction = 1.0 - self.sustain_level;
        self.decay_samples = (full_decay * fraction * self.sample_rate).round().max(0.0) as u32;
        self.release_seconds = timecents_to_seconds(gens.get(Gen::ReleaseModEnv) as i32);
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.release_start = self.value;
        self.release_total = (self.release_seconds * self.release_start * self.sample_rate)
            .round()
            .max(1.0) as u32;
        self.release_pos = 0;
        self.released = true;
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if self.released {
            if self.release_pos >= self.release_total {
                self.value = 0.0;
                return 0.0;
            }
            let progress = self.release_pos as f32 / self.release_total as f32;
            self.release_pos += 1;
            self.value = self.release_start * (1.0 - progress);
            return self.value;
        }
        match self.phase {
            EnvPhase::Delay => {
                if self.pos >= self.delay_samples {
                    self.phase = EnvPhase::Attack;
                    self.pos = 0;
                    return self.next_sample();
                }
                self.pos += 1;
                self.value = 0.0;
                0.0
            }
            EnvPhase::Attack => {
                if self.pos >= self.attack_samples {
                    self.phase = EnvPhase::Hold;
                    self.pos = 0;
                    self.value = 1.0;
                    return self.next_sample();
                }
                // Convex curve, same family the modulator transforms use
                self.value = convex(self.pos as f32 / self.attack_samples as f32);
                self.pos += 1;
                self.value
            }
            EnvPhase::Hold => {
                if self.pos >= self.hold_samples {
                    self.phase = EnvPhase::Decay;
                    self.pos = 0;
                    return self.next_sample();
                }
                self.pos += 1;
                self.value = 1.0;
                1.0
            }
            EnvPhase::Decay => {
                if self.pos >= self.decay_samples {
                    self.phase = EnvPhase::Sustain;
                    self.pos = 0;
                    self.value = self.sustain_level;
                    return self.next_sample();
                }
                let progress = self.pos as f32 / self.decay_samples as f32;
                self.pos += 1;
                self.value = 1.0 - (1.0 - self.sustain_level) * progress;
                self.value
            }
            EnvPhase::Sustain => {
                self.value = self.sustain_level;
                self.value
            }
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Advance a whole block and return the value at its end. Modulation
    /// depth is consumed at block rate; the filter's own smoothing hides
    /// the stepping.
    pub fn advance_block(&mut self, n: u32) -> f32 {
        let mut v = self.value;
        for _ in 0..n {
            v = self.next_sample();
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::generator::{default_generators, GeneratorSet};

    const SR: f32 = 48_000.0;

    fn gens_with(pairs: &[(Gen, i16)]) -> GeneratorSet {
        let mut base = default_generators();
        for (g, v) in pairs {
            base[g.idx()] = *v;
        }
        GeneratorSet::new(base)
    }

    #[test]
    fn delay_phase_is_silent() {
        // ~46 ms delay, instant attack
        let gens = gens_with(&[(Gen::DelayVolEnv, -5316), (Gen::AttackVolEnv, -12000)]);
        let mut env = VolumeEnvelope::new(SR);
        env.update(&gens, 60);
        let delay_samples = (0.046 * SR) as usize;
        for _ in 0..delay_samples - 10 {
            assert_eq!(env.next_sample(), 0.0);
        }
    }

    #[test]
    fn attack_is_linear_in_gain() {
        // 1 second attack at 0 tc
        let gens = gens_with(&[(Gen::AttackVolEnv, 0)]);
        let mut env = VolumeEnvelope::new(SR);
        env.update(&gens, 60);
        let mut last = -1.0;
        for _ in 0..(SR as usize / 2) {
            let g = env.next_sample();
            assert!(g >= last);
            last = g;
        }
        // Halfway through a linear ramp
        assert!((last - 0.5).abs() < 0.01);
    }

    #[test]
    fn release_finishes_within_duration() {
        let gens = gens_with(&[(Gen::AttackVolEnv, -12000), (Gen::ReleaseVolEnv, -3000)]);
        let mut env = VolumeEnvelope::new(SR);
        env.update(&gens, 60);
        // Get to the hold/sustain plateau
        for _ in 0..100 {
            env.next_sample();
        }
        env.release();
        let release_budget = (timecents_to_seconds(-3000) * SR) as usize + 2;
        let mut finished_at = None;
        for i in 0..release_budget {
            let g = env.next_sample();
            assert!(g.is_finite() && g >= 0.0);
            if env.finished() {
                finished_at = Some(i);
                break;
            }
        }
        assert!(finished_at.is_some(), "release never finished");
    }

    #[test]
    fn release_from_attack_captures_level() {
        let gens = gens_with(&[(Gen::AttackVolEnv, 0), (Gen::ReleaseVolEnv, -1200)]);
        let mut env = VolumeEnvelope::new(SR);
        env.update(&gens, 60);
        for _ in 0..(SR as usize / 4) {
            env.next_sample();
        }
        let level_before = env.attenuation_db();
        env.release();
        let g = env.next_sample();
        // First release sample continues from the captured attack level
        assert!((env.attenuation_db() - level_before).abs() < 1.0);
        assert!(g > 0.0);
    }

    #[test]
    fn sustain_decay_is_proportional() {
        // Full-scale decay (sustain = silence) vs. shallow decay
        let deep = gens_with(&[
            (Gen::AttackVolEnv, -12000),
            (Gen::DecayVolEnv, 0),
            (Gen::SustainVolEnv, 1000),
        ]);
        let shallow = gens_with(&[
            (Gen::AttackVolEnv, -12000),
            (Gen::DecayVolEnv, 0),
            (Gen::SustainVolEnv, 100),
        ]);
        let mut e_deep = VolumeEnvelope::new(SR);
        let mut e_shallow = VolumeEnvelope::new(SR);
        e_deep.update(&deep, 60);
        e_shallow.update(&shallow, 60);
        assert!(e_deep.decay_samples > e_shallow.decay_samples * 5);
    }

    #[test]
    fn keynum_hold_scaling_is_timecents_per_key() {
        // 50 tc per key over the 60 keys below middle C is +3000 tc,
        // stretching a 1 s hold to 2^2.5 s
        let gens = gens_with(&[
            (Gen::AttackVolEnv, -12000),
            (Gen::HoldVolEnv, 0),
            (Gen::KeynumToVolEnvHold, 50),
        ]);
        let mut env = VolumeEnvelope::new(1000.0);
        env.update(&gens, 0);
        assert!(
            (env.hold_samples as f32 - 5657.0).abs() < 5.0,
            "hold {} samples",
            env.hold_samples
        );
        // At key 60 the shift vanishes
        env.update(&gens, 60);
        assert_eq!(env.hold_samples, 1000);
        // Above key 60 a positive generator shortens the hold
        env.update(&gens, 72);
        assert!(env.hold_samples < 1000);
    }

    #[test]
    fn keynum_hold_scaling_applies_to_mod_env() {
        let gens = gens_with(&[
            (Gen::HoldModEnv, 0),
            (Gen::KeynumToModEnvHold, 50),
        ]);
        let mut env = ModulationEnvelope::new(1000.0);
        env.update(&gens, 0);
        assert!((env.hold_samples as f32 - 5657.0).abs() < 5.0);
    }

    #[test]
    fn mod_env_reaches_sustain() {
        let gens = gens_with(&[
            (Gen::AttackModEnv, -12000),
            (Gen::DecayModEnv, -12000),
            (Gen::SustainModEnv, 250),
        ]);
        let mut env = ModulationEnvelope::new(SR);
        env.update(&gens, 60);
        for _ in 0..200 {
            env.next_sample();
        }
        assert!((env.value() - 0.75).abs() < 0.01);
    }

    #[test]
    fn mod_env_attack_is_convex() {
        let gens = gens_with(&[(Gen::AttackModEnv, 0)]);
        let mut env = ModulationEnvelope::new(SR);
        env.update(&gens, 60);
        for _ in 0..(SR as usize / 2) {
            env.next_sample();
        }
        // Convex: at half time the curve is already above the linear value
        assert!(env.value() > 0.5);
    }
}
