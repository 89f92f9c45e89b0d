// One sounding sample layer. A voice owns its playback cursor, filter,
// envelope pair, LFOs, the base/modulated generator arrays and the merged
// modulator list, and renders mono blocks that it then pans additively into
// the main and send buses.

use std::sync::Arc;

use crate::bank::VoiceTemplate;
use crate::engine::envelope::{ModulationEnvelope, VolumeEnvelope};
use crate::engine::filter::LowPassFilter;
use crate::engine::generator::{Gen, GeneratorSet, GEN_COUNT};
use crate::engine::lfo::Lfo;
use crate::engine::modulator::{
    default_modulators, recompute_all, recompute_source, ModContext, Modulator,
};
use crate::engine::oscillator::{Interpolation, SampleState};
use crate::engine::units::{cents_to_ratio, db_to_gain};

/// Release override used by kill and exclusive-class collisions: ~1 ms.
pub const KILL_RELEASE_TC: i16 = -12_000;

/// Per-block pan smoothing factor.
const PAN_SMOOTH: f32 = 0.2;

/// Channel-wide state a voice needs for one block.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams {
    /// Pitch-wheel, channel tuning and transpose fraction, in cents.
    pub pitch_cents: f32,
    pub channel_gain: f32,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub sample: SampleState,
    filter: LowPassFilter,
    pub vol_env: VolumeEnvelope,
    mod_env: ModulationEnvelope,
    mod_lfo: Lfo,
    vib_lfo: Lfo,
    pub gens: GeneratorSet,
    pub modulators: Vec<Modulator>,

    /// Real (post-key-shift) MIDI key, used for note-off matching.
    pub key: u8,
    pub velocity: u8,
    pub poly_pressure: u8,
    pub exclusive_class: i16,
    pub finished: bool,

    root_key: f32,
    /// Fractional detune from the tuning source, cents.
    tuning_cents: f32,

    portamento_from: f32,
    portamento_len: u32,
    portamento_pos: u32,

    pan_current: f32,
    /// Random-pan override, -1..1, fixed at note-on.
    pub pan_offset: f32,
}

impl Voice {
    /// Instantiate from an immutable template. Only the fields that must
    /// diverge are copied; the sample frames stay shared. The template's
    /// modulators override same-identity defaults, channel-dynamic
    /// modulators override both.
    pub fn from_template(
        template: &VoiceTemplate,
        dynamic_mods: &[Modulator],
        key: u8,
        velocity: u8,
        tuning_cents: f32,
        sample_rate: f32,
    ) -> Self {
        let gens = GeneratorSet::new(template.generators);
        let mut modulators = default_modulators();
        merge_modulators(&mut modulators, &template.modulators);
        merge_modulators(&mut modulators, dynamic_mods);

        let sample = SampleState::new(
            Arc::clone(&template.sample),
            &template.generators,
            sample_rate,
        );
        let root_key = match gens.base(Gen::OverridingRootKey) {
            k if k >= 0 => k as f32,
            _ => template.sample.root_key as f32,
        };

        Self {
            sample,
            filter: LowPassFilter::new(sample_rate),
            vol_env: VolumeEnvelope::new(sample_rate),
            mod_env: ModulationEnvelope::new(sample_rate),
            mod_lfo: Lfo::new(sample_rate),
            vib_lfo: Lfo::new(sample_rate),
            gens,
            modulators,
            key,
            velocity,
            poly_pressure: 0,
            exclusive_class: template.generators[Gen::ExclusiveClass.idx()],
            finished: false,
            root_key,
            tuning_cents,
            portamento_from: key as f32,
            portamento_len: 0,
            portamento_pos: 0,
            pan_current: 0.0,
            pan_offset: 0.0,
        }
    }

    /// The key the generator model sees, honoring the keynum override.
    #[inline]
    pub fn effective_key(&self) -> u8 {
        match self.gens.base(Gen::Keynum) {
            k if k >= 0 => k as u8,
            _ => self.key,
        }
    }

    /// Velocity honoring the velocity generator override.
    #[inline]
    pub fn effective_velocity(&self) -> u8 {
        match self.gens.base(Gen::Velocity) {
            v if v >= 0 => v as u8,
            _ => self.velocity,
        }
    }

    /// Full modulator recompute plus refresh of everything derived from
    /// the modulated generators. Called once at note-on.
    pub fn compute_modulators(&mut self, ctx: &ModContext, offsets: &[i32; GEN_COUNT]) {
        recompute_all(&mut self.gens, &self.modulators, offsets, ctx);
        self.refresh_derived();
    }

    /// Incremental recompute for one changed controller source.
    pub fn source_changed(
        &mut self,
        ctx: &ModContext,
        offsets: &[i32; GEN_COUNT],
        is_cc: bool,
        index: u8,
    ) {
        recompute_source(&mut self.gens, &self.modulators, offsets, ctx, is_cc, index);
        self.refresh_derived();
    }

    fn refresh_derived(&mut self) {
        let key = self.effective_key();
        self.vol_env.update(&self.gens, key);
        self.mod_env.update(&self.gens, key);
        self.mod_lfo.update(
            self.gens.get(Gen::DelayModLfo) as i32,
            self.gens.get(Gen::FreqModLfo) as i32,
        );
        self.vib_lfo.update(
            self.gens.get(Gen::DelayVibLfo) as i32,
            self.gens.get(Gen::FreqVibLfo) as i32,
        );
    }

    /// Linear key glide from `from_key` over `seconds`.
    pub fn start_portamento(&mut self, from_key: u8, seconds: f32, sample_rate: f32) {
        self.portamento_from = from_key as f32;
        self.portamento_len = (seconds * sample_rate).round().max(1.0) as u32;
        self.portamento_pos = 0;
    }

    pub fn release(&mut self) {
        self.vol_env.release();
        self.mod_env.release();
        self.sample.on_release();
    }

    /// Near-instant fade bypassing the programmed release time. Used for
    /// exclusive-class collisions, monophonic retrigger and governor kills.
    pub fn kill(&mut self) {
        self.gens.base[Gen::ReleaseVolEnv.idx()] = KILL_RELEASE_TC;
        self.gens.modulated[Gen::ReleaseVolEnv.idx()] = KILL_RELEASE_TC;
        self.vol_env.update(&self.gens, self.effective_key());
        self.release();
    }

    #[inline]
    pub fn released(&self) -> bool {
        self.vol_env.released()
    }

    fn glide_key(&mut self, advance: u32) -> f32 {
        if self.portamento_pos >= self.portamento_len {
            return self.key as f32;
        }
        let t = self.portamento_pos as f32 / self.portamento_len as f32;
        self.portamento_pos += advance;
        self.portamento_from + (self.key as f32 - self.portamento_from) * t
    }

    /// Render one mono block into `scratch` and mix it into the stereo
    /// main buffers and the reverb/chorus send buses. All writes are `+=`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_block(
        &mut self,
        scratch: &mut [f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
        rev_l: &mut [f32],
        rev_r: &mut [f32],
        cho_l: &mut [f32],
        cho_r: &mut [f32],
        p: &RenderParams,
    ) {
        if self.finished {
            return;
        }
        let n = scratch.len();

        let mod_lfo = self.mod_lfo.tick_block(n as u32);
        let vib_lfo = self.vib_lfo.tick_block(n as u32);
        let mod_env = self.mod_env.advance_block(n as u32);
        let key = self.glide_key(n as u32);

        // scaleTuning is cents of pitch change per key of distance
        let cents = (key - self.root_key) * self.gens.get(Gen::ScaleTuning) as f32
            + self.sample.data.pitch_correction as f32
            + self.gens.get(Gen::CoarseTune) as f32 * 100.0
            + self.gens.get(Gen::FineTune) as f32
            + self.tuning_cents
            + p.pitch_cents
            + vib_lfo * self.gens.get(Gen::VibLfoToPitch) as f32
            + mod_lfo * self.gens.get(Gen::ModLfoToPitch) as f32
            + mod_env * self.gens.get(Gen::ModEnvToPitch) as f32;
        let step = self.sample.base_step * cents_to_ratio(cents) as f64;

        let osc_done = self.sample.render(scratch, step, p.interpolation);

        let fc_excursion = mod_lfo * self.gens.get(Gen::ModLfoToFilterFc) as f32
            + mod_env * self.gens.get(Gen::ModEnvToFilterFc) as f32;
        self.filter.process_block(
            scratch,
            self.gens.get(Gen::InitialFilterFc),
            fc_excursion,
            self.gens.get(Gen::InitialFilterQ),
        );

        // Static attenuation plus tremolo, in dB; the envelope multiplies
        // per sample on top.
        let atten_db = self.gens.get(Gen::InitialAttenuation) as f32 / 10.0
            + mod_lfo * self.gens.get(Gen::ModLfoToVolume) as f32 / 10.0;
        let gain = db_to_gain(atten_db.max(0.0)) * p.channel_gain;
        for s in scratch.iter_mut() {
            *s *= gain * self.vol_env.next_sample();
        }

        if osc_done || self.vol_env.finished() {
            self.finished = true;
        }

        // Equal-power pan, ramped across the block from the previous
        // smoothed position to the new one.
        let target_pan =
            (self.gens.get(Gen::Pan) as f32 / 500.0 + self.pan_offset).clamp(-1.0, 1.0);
        let (l0, r0) = pan_gains(self.pan_current);
        self.pan_current += (target_pan - self.pan_current) * PAN_SMOOTH;
        let (l1, r1) = pan_gains(self.pan_current);

        let rev_level = self.gens.get(Gen::ReverbEffectsSend) as f32 / 1000.0;
        let cho_level = self.gens.get(Gen::ChorusEffectsSend) as f32 / 1000.0;
        let inv_n = 1.0 / n as f32;
        for (i, &s) in scratch.iter().enumerate() {
            let t = i as f32 * inv_n;
            let gl = l0 + (l1 - l0) * t;
            let gr = r0 + (r1 - r0) * t;
            out_l[i] += s * gl;
            out_r[i] += s * gr;
            if rev_level > 0.0 {
                rev_l[i] += s * gl * rev_level;
                rev_r[i] += s * gr * rev_level;
            }
            if cho_level > 0.0 {
                cho_l[i] += s * gl * cho_level;
                cho_r[i] += s * gr * cho_level;
            }
        }
    }

    /// Governor inputs that only the voice knows.
    #[inline]
    pub fn envelope_progress(&self) -> f32 {
        self.vol_env.progress()
    }

    #[inline]
    pub fn attenuation_db(&self) -> f32 {
        self.vol_env.attenuation_db()
    }
}

/// Equal-power pan: -1 hard left, 1 hard right.
#[inline]
fn pan_gains(pan: f32) -> (f32, f32) {
    let theta = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Merge `extra` into `mods`: a same-identity modulator replaces the
/// existing one (amount wins), anything else appends.
pub fn merge_modulators(mods: &mut Vec<Modulator>, extra: &[Modulator]) {
    for m in extra {
        if let Some(existing) = mods.iter_mut().find(|e| e.same_identity(m)) {
            *existing = *m;
        } else {
            mods.push(*m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::SampleData;
    use crate::engine::generator::default_generators;
    use crate::engine::modulator::{CurveType, ModSource, Transform};

    fn template() -> VoiceTemplate {
        let frames: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.05).sin()).collect();
        let sample = Arc::new(SampleData::new(frames, 44_100.0, 60, 0, 512, 1536));
        let mut gens = default_generators();
        gens[Gen::SampleModes.idx()] = 1;
        gens[Gen::AttackVolEnv.idx()] = -12_000;
        VoiceTemplate {
            sample,
            generators: gens,
            modulators: Vec::new(),
        }
    }

    fn ctx(controllers: &[i16; 128]) -> ModContext {
        ModContext {
            controllers,
            velocity: 100,
            key: 60,
            poly_pressure: 0,
            channel_pressure: 0,
            pitch_wheel: 8192,
            pitch_wheel_range: 2,
        }
    }

    fn default_controllers() -> [i16; 128] {
        let mut t = [0i16; 128];
        t[7] = 100 << 7;
        t[11] = 127 << 7;
        t
    }

    fn render_once(v: &mut Voice, n: usize) -> (Vec<f32>, Vec<f32>) {
        let mut scratch = vec![0.0; n];
        let mut l = vec![0.0; n];
        let mut r = vec![0.0; n];
        let mut rev_l = vec![0.0; n];
        let mut rev_r = vec![0.0; n];
        let mut cho_l = vec![0.0; n];
        let mut cho_r = vec![0.0; n];
        let p = RenderParams {
            pitch_cents: 0.0,
            channel_gain: 1.0,
            interpolation: Interpolation::Linear,
        };
        v.render_block(
            &mut scratch,
            &mut l,
            &mut r,
            &mut rev_l,
            &mut rev_r,
            &mut cho_l,
            &mut cho_r,
            &p,
        );
        (l, r)
    }

    #[test]
    fn instant_attack_produces_output() {
        let tpl = template();
        let controllers = default_controllers();
        let mut v = Voice::from_template(&tpl, &[], 60, 100, 0.0, 44_100.0);
        v.compute_modulators(&ctx(&controllers), &[0; GEN_COUNT]);
        let (l, r) = render_once(&mut v, 256);
        let energy: f32 = l.iter().chain(r.iter()).map(|x| x * x).sum();
        assert!(energy > 0.0);
        assert!(!v.finished);
    }

    #[test]
    fn kill_finishes_quickly() {
        let tpl = template();
        let controllers = default_controllers();
        let mut v = Voice::from_template(&tpl, &[], 60, 100, 0.0, 44_100.0);
        v.compute_modulators(&ctx(&controllers), &[0; GEN_COUNT]);
        render_once(&mut v, 128);
        v.kill();
        // ~1 ms release at 44.1 kHz is under two 128-sample blocks
        render_once(&mut v, 128);
        render_once(&mut v, 128);
        assert!(v.finished);
    }

    #[test]
    fn template_modulator_overrides_default_amount() {
        let mut tpl = template();
        tpl.modulators.push(Modulator {
            source: ModSource::cc(91, CurveType::Linear, false, false),
            secondary: ModSource::none(),
            amount: 1000,
            transform: Transform::Linear,
            dest: Gen::ReverbEffectsSend,
        });
        let v = Voice::from_template(&tpl, &[], 60, 100, 0.0, 44_100.0);
        let matching: Vec<_> = v
            .modulators
            .iter()
            .filter(|m| m.dest == Gen::ReverbEffectsSend)
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].amount, 1000);
    }

    #[test]
    fn release_then_finished_stays_silent() {
        let tpl = template();
        let controllers = default_controllers();
        let mut v = Voice::from_template(&tpl, &[], 60, 100, 0.0, 44_100.0);
        v.compute_modulators(&ctx(&controllers), &[0; GEN_COUNT]);
        render_once(&mut v, 128);
        v.kill();
        for _ in 0..8 {
            render_once(&mut v, 128);
        }
        assert!(v.finished);
        let (l, _) = render_once(&mut v, 128);
        assert!(l.iter().all(|&x| x == 0.0));
    }
}
