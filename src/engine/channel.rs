// One MIDI channel: the controller table, note lifecycle, tuning state and
// the per-block render loop over its voices. All MIDI-facing mutation is
// synchronous; the owning synthesizer calls render once per quantum after
// the events for that quantum have been applied.

use log::warn;

use crate::bank::{KeyTuning, VoiceTemplate};
use crate::engine::generator::{Gen, GEN_COUNT};
use crate::engine::modulator::{source_index, ModContext, Modulator};
use crate::engine::oscillator::Interpolation;
use crate::engine::voice::{merge_modulators, RenderParams, Voice};

/// GM percussion channel (zero-based).
pub const DRUM_CHANNEL: usize = 9;

const CC_MODULATION: u8 = 1;
const CC_PORTAMENTO_TIME: u8 = 5;
const CC_SUSTAIN: u8 = 64;
const CC_PORTAMENTO: u8 = 65;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_RESET_CONTROLLERS: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

/// The six destination buses one render quantum writes into. Slices are
/// already offset to the quantum start and trimmed to its length.
pub struct RenderBufs<'a> {
    pub out_l: &'a mut [f32],
    pub out_r: &'a mut [f32],
    pub rev_l: &'a mut [f32],
    pub rev_r: &'a mut [f32],
    pub cho_l: &'a mut [f32],
    pub cho_r: &'a mut [f32],
}

pub struct Channel {
    sample_rate: f32,

    /// 14-bit controller values, 7-bit writes land in the high bits.
    pub controllers: [i16; 128],
    locked: [bool; 128],

    pub voices: Vec<Voice>,
    /// Voices whose note-off arrived while the sustain pedal was down.
    pub sustained: Vec<Voice>,

    pub pitch_wheel: i16,
    pub pitch_wheel_range: u8,
    pub channel_pressure: u8,

    /// Whole-key transpose applied before preset lookup.
    pub key_shift: i8,
    /// Fractional channel tuning in cents.
    pub fine_tune_cents: f32,

    /// AWE-style per-generator additive offsets, stacked under the
    /// modulator sum.
    gen_offsets: [i32; GEN_COUNT],

    /// Channel-dynamic modulators merged into every new voice.
    dynamic_modulators: Vec<Modulator>,

    pub drum: bool,
    pub muted: bool,
    pub random_pan: bool,

    last_key: Option<u8>,
    rng_state: u32,

    scratch: Vec<f32>,
}

fn default_controller_table() -> [i16; 128] {
    let mut t = [0i16; 128];
    t[7] = 100 << 7; // volume
    t[10] = 64 << 7; // pan center
    t[11] = 127 << 7; // expression
    t
}

impl Channel {
    pub fn new(sample_rate: f32, index: usize, block_size: usize) -> Self {
        Self {
            sample_rate,
            controllers: default_controller_table(),
            locked: [false; 128],
            voices: Vec::new(),
            sustained: Vec::new(),
            pitch_wheel: 8192,
            pitch_wheel_range: 2,
            channel_pressure: 0,
            key_shift: 0,
            fine_tune_cents: 0.0,
            gen_offsets: [0; GEN_COUNT],
            dynamic_modulators: Vec::new(),
            drum: index == DRUM_CHANNEL,
            muted: false,
            random_pan: false,
            last_key: None,
            rng_state: 0x9e37_79b9 ^ (index as u32).wrapping_mul(0x85eb_ca6b) | 1,
            scratch: vec![0.0; block_size],
        }
    }

    /// Key after channel transpose; note lookup and voice matching both go
    /// through this so a shifted note-on always pairs with its note-off.
    #[inline]
    pub fn real_key(&self, key: u8) -> u8 {
        (key as i16 + self.key_shift as i16).clamp(0, 127) as u8
    }

    #[inline]
    fn mod_ctx_snapshot(&self) -> ([i16; 128], i16, i16, u8) {
        (
            self.controllers,
            self.pitch_wheel,
            self.pitch_wheel_range as i16,
            self.channel_pressure,
        )
    }

    /// Start voices for one note from the resolved templates. The caller
    /// has already validated the key and looked up the prototype list; the
    /// channel applies key shift, tuning override, exclusive classes,
    /// portamento and the initial modulator computation.
    pub fn note_on(
        &mut self,
        templates: &[VoiceTemplate],
        key: u8,
        velocity: u8,
        tuning: Option<KeyTuning>,
    ) {
        let shifted = self.real_key(key);
        let (real_key, tuning_cents) = match tuning {
            Some(t) => (t.key, t.cents),
            None => (shifted, 0.0),
        };

        let portamento_from = self.last_key;
        self.last_key = Some(real_key);
        let portamento_on = !self.drum && self.cc(CC_PORTAMENTO) >= 64;

        // Exclusive classes silence pre-existing voices only; layers of this
        // same note-on sharing a class must all sound, so new voices are
        // collected aside and appended after the kill pass.
        for template in templates {
            let class = template.generators[Gen::ExclusiveClass.idx()];
            if class != 0 {
                for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
                    if v.exclusive_class == class {
                        v.kill();
                    }
                }
            }
        }

        let mut started = Vec::with_capacity(templates.len());
        for template in templates {
            let mut voice = Voice::from_template(
                template,
                &self.dynamic_modulators,
                real_key,
                velocity,
                tuning_cents,
                self.sample_rate,
            );
            if self.random_pan {
                voice.pan_offset = self.next_random_bipolar();
            }
            if portamento_on {
                if let Some(from) = portamento_from {
                    if from != real_key {
                        voice.start_portamento(from, self.portamento_seconds(), self.sample_rate);
                    }
                }
            }

            let (ctrls, wheel, range, pressure) = self.mod_ctx_snapshot();
            let ctx = ModContext {
                controllers: &ctrls,
                velocity: voice.effective_velocity(),
                key: voice.effective_key(),
                poly_pressure: 0,
                channel_pressure: pressure,
                pitch_wheel: wheel,
                pitch_wheel_range: range,
            };
            voice.compute_modulators(&ctx, &self.gen_offsets);
            started.push(voice);
        }
        self.voices.append(&mut started);
    }

    /// Release voices for a key; with the sustain pedal down they move to
    /// the sustained list instead and release when the pedal lifts.
    pub fn note_off(&mut self, key: u8) {
        let shifted = self.real_key(key);
        if self.cc(CC_SUSTAIN) >= 64 {
            let mut i = 0;
            while i < self.voices.len() {
                if self.voices[i].key == shifted && !self.voices[i].released() {
                    let v = self.voices.remove(i);
                    self.sustained.push(v);
                } else {
                    i += 1;
                }
            }
            return;
        }
        for v in &mut self.voices {
            if v.key == shifted {
                v.release();
            }
        }
    }

    /// Near-instant fade for a key, bypassing the programmed release.
    pub fn kill_note(&mut self, key: u8) {
        let shifted = self.real_key(key);
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            if v.key == shifted {
                v.kill();
            }
        }
    }

    /// `force` kills everything immediately; otherwise voices get their
    /// programmed release.
    pub fn stop_all_notes(&mut self, force: bool) {
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            if force {
                v.kill();
            } else {
                v.release();
            }
        }
        self.last_key = None;
    }

    #[inline]
    pub fn cc(&self, cc: u8) -> i16 {
        self.controllers[(cc & 127) as usize] >> 7
    }

    /// 7-bit controller write plus the channel-mode message handling for
    /// CC120/121/123 and the sustain pedal. Locked controllers ignore
    /// writes. Voices get an incremental modulator recompute for the
    /// changed source.
    pub fn controller_change(&mut self, cc: u8, value: u8) {
        let cc = cc & 127;
        match cc {
            CC_ALL_SOUND_OFF => {
                self.stop_all_notes(true);
                return;
            }
            CC_ALL_NOTES_OFF => {
                self.stop_all_notes(false);
                return;
            }
            CC_RESET_CONTROLLERS => {
                self.reset_controllers();
                return;
            }
            _ => {}
        }
        if self.locked[cc as usize] {
            return;
        }
        self.controllers[cc as usize] = (value as i16 & 127) << 7;

        if cc == CC_SUSTAIN && value < 64 {
            // Pedal lifted: sustained voices finally release
            let mut freed = std::mem::take(&mut self.sustained);
            for v in &mut freed {
                v.release();
            }
            self.voices.append(&mut freed);
        }

        self.recompute_voices_for(true, cc);
    }

    /// Reset controllers per CC121: modulation, pedals, expression, pitch
    /// wheel and pressure go back to defaults; volume, pan and the sound
    /// controllers are kept, as are locked entries.
    pub fn reset_controllers(&mut self) {
        let defaults = default_controller_table();
        for cc in [CC_MODULATION, CC_SUSTAIN, CC_PORTAMENTO, 11u8, 66, 67] {
            if !self.locked[cc as usize] {
                self.controllers[cc as usize] = defaults[cc as usize];
            }
        }
        self.pitch_wheel = 8192;
        self.channel_pressure = 0;
        // Resetting the pedal releases anything it was holding
        let mut freed = std::mem::take(&mut self.sustained);
        for v in &mut freed {
            v.release();
        }
        self.voices.append(&mut freed);
        for cc in [CC_MODULATION, CC_SUSTAIN, 11u8] {
            self.recompute_voices_for(true, cc);
        }
        self.recompute_voices_for(false, source_index::PITCH_WHEEL);
        self.recompute_voices_for(false, source_index::CHANNEL_PRESSURE);
    }

    /// Prevent a controller from being changed by the event stream, e.g.
    /// while a host UI has taken it over.
    pub fn lock_controller(&mut self, cc: u8, locked: bool) {
        self.locked[(cc & 127) as usize] = locked;
    }

    pub fn pitch_wheel(&mut self, value: i16) {
        self.pitch_wheel = value.clamp(0, 16383);
        self.recompute_voices_for(false, source_index::PITCH_WHEEL);
    }

    pub fn channel_pressure(&mut self, value: u8) {
        self.channel_pressure = value & 127;
        self.recompute_voices_for(false, source_index::CHANNEL_PRESSURE);
    }

    pub fn poly_pressure(&mut self, key: u8, value: u8) {
        let shifted = self.real_key(key);
        let (ctrls, wheel, range, pressure) = self.mod_ctx_snapshot();
        let offsets = self.gen_offsets;
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            if v.key != shifted {
                continue;
            }
            v.poly_pressure = value & 127;
            let ctx = ModContext {
                controllers: &ctrls,
                velocity: v.effective_velocity(),
                key: v.effective_key(),
                poly_pressure: v.poly_pressure,
                channel_pressure: pressure,
                pitch_wheel: wheel,
                pitch_wheel_range: range,
            };
            v.source_changed(&ctx, &offsets, false, source_index::POLY_PRESSURE);
        }
    }

    /// AWE-style additive generator offset, stacked under the modulator
    /// sum. Takes effect on running voices via a full recompute.
    pub fn set_generator_offset(&mut self, gen: Gen, offset: i32) {
        self.gen_offsets[gen.idx()] = offset;
        let (ctrls, wheel, range, pressure) = self.mod_ctx_snapshot();
        let offsets = self.gen_offsets;
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            let ctx = ModContext {
                controllers: &ctrls,
                velocity: v.effective_velocity(),
                key: v.effective_key(),
                poly_pressure: v.poly_pressure,
                channel_pressure: pressure,
                pitch_wheel: wheel,
                pitch_wheel_range: range,
            };
            v.compute_modulators(&ctx, &offsets);
        }
    }

    /// Install or replace a channel-dynamic modulator; applies to future
    /// note-ons.
    pub fn add_dynamic_modulator(&mut self, m: Modulator) {
        merge_modulators(&mut self.dynamic_modulators, std::slice::from_ref(&m));
    }

    fn recompute_voices_for(&mut self, is_cc: bool, index: u8) {
        let (ctrls, wheel, range, pressure) = self.mod_ctx_snapshot();
        let offsets = self.gen_offsets;
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            let ctx = ModContext {
                controllers: &ctrls,
                velocity: v.effective_velocity(),
                key: v.effective_key(),
                poly_pressure: v.poly_pressure,
                channel_pressure: pressure,
                pitch_wheel: wheel,
                pitch_wheel_range: range,
            };
            v.source_changed(&ctx, &offsets, is_cc, index);
        }
    }

    /// Channel-wide pitch offset in cents: wheel excursion over the bend
    /// range plus the fractional channel tuning.
    fn pitch_cents(&self) -> f32 {
        let bend = (self.pitch_wheel - 8192) as f32 / 8192.0;
        bend * self.pitch_wheel_range as f32 * 100.0 + self.fine_tune_cents
    }

    /// Portamento time curve: CC5 maps quadratically onto 0..5 s, which
    /// tracks the usable range of hardware glide knobs.
    fn portamento_seconds(&self) -> f32 {
        let x = self.cc(CC_PORTAMENTO_TIME) as f32 / 127.0;
        x * x * 5.0
    }

    fn next_random_bipolar(&mut self) -> f32 {
        // xorshift32
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng_state = x;
        (x as f32 * 2.328_306_4e-10) * 2.0 - 1.0
    }

    #[inline]
    pub fn voice_count(&self) -> usize {
        self.voices.len() + self.sustained.len()
    }

    /// Render every voice additively into the buses. Finished voices are
    /// removed only after the whole list has been iterated.
    pub fn render_block(&mut self, bufs: &mut RenderBufs<'_>, interpolation: Interpolation) {
        if self.voice_count() == 0 {
            return;
        }
        let n = bufs.out_l.len();
        if self.scratch.len() < n {
            warn!(
                "channel scratch buffer grown {} -> {} (block size changed mid-stream)",
                self.scratch.len(),
                n
            );
            self.scratch.resize(n, 0.0);
        }
        let params = RenderParams {
            pitch_cents: self.pitch_cents(),
            channel_gain: if self.muted { 0.0 } else { 1.0 },
            interpolation,
        };
        for v in self.voices.iter_mut().chain(self.sustained.iter_mut()) {
            let scratch = &mut self.scratch[..n];
            scratch.fill(0.0);
            v.render_block(
                scratch,
                bufs.out_l,
                bufs.out_r,
                bufs.rev_l,
                bufs.rev_r,
                bufs.cho_l,
                bufs.cho_r,
                &params,
            );
        }
        self.voices.retain(|v| !v.finished);
        self.sustained.retain(|v| !v.finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::SampleData;
    use crate::engine::generator::default_generators;
    use std::sync::Arc;

    fn templates() -> Vec<VoiceTemplate> {
        let frames: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.03).sin()).collect();
        let sample = Arc::new(SampleData::new(frames, 44_100.0, 60, 0, 1024, 3072));
        let mut gens = default_generators();
        gens[Gen::SampleModes.idx()] = 1;
        gens[Gen::AttackVolEnv.idx()] = -12_000;
        vec![VoiceTemplate {
            sample,
            generators: gens,
            modulators: Vec::new(),
        }]
    }

    fn render(ch: &mut Channel, n: usize) -> Vec<f32> {
        let mut l = vec![0.0; n];
        let mut r = vec![0.0; n];
        let mut rl = vec![0.0; n];
        let mut rr = vec![0.0; n];
        let mut cl = vec![0.0; n];
        let mut cr = vec![0.0; n];
        let mut bufs = RenderBufs {
            out_l: &mut l,
            out_r: &mut r,
            rev_l: &mut rl,
            rev_r: &mut rr,
            cho_l: &mut cl,
            cho_r: &mut cr,
        };
        ch.render_block(&mut bufs, Interpolation::Linear);
        l
    }

    #[test]
    fn sustain_pedal_holds_notes() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.controller_change(CC_SUSTAIN, 127);
        ch.note_on(&templates(), 60, 100, None);
        assert_eq!(ch.voices.len(), 1);
        ch.note_off(60);
        assert_eq!(ch.voices.len(), 0);
        assert_eq!(ch.sustained.len(), 1);
        assert!(!ch.sustained[0].released());
        ch.controller_change(CC_SUSTAIN, 0);
        assert_eq!(ch.sustained.len(), 0);
        assert_eq!(ch.voices.len(), 1);
        assert!(ch.voices[0].released());
    }

    #[test]
    fn note_off_releases_matching_voices() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.note_on(&templates(), 60, 100, None);
        ch.note_on(&templates(), 64, 100, None);
        ch.note_off(60);
        assert!(ch.voices.iter().any(|v| v.key == 60 && v.released()));
        assert!(ch.voices.iter().any(|v| v.key == 64 && !v.released()));
    }

    #[test]
    fn exclusive_class_kills_older_voice() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        let mut tpls = templates();
        tpls[0].generators[Gen::ExclusiveClass.idx()] = 5;
        ch.note_on(&tpls, 42, 100, None);
        assert!(!ch.voices[0].released());
        ch.note_on(&tpls, 46, 100, None);
        assert!(ch.voices[0].released(), "older voice must be fading");
        assert!(!ch.voices[1].released());
    }

    #[test]
    fn shared_class_layers_of_one_note_all_sound() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        let mut tpls = templates();
        tpls[0].generators[Gen::ExclusiveClass.idx()] = 5;
        tpls.push(tpls[0].clone());
        ch.note_on(&tpls, 60, 100, None);
        assert_eq!(ch.voices.len(), 2);
        assert!(
            ch.voices.iter().all(|v| !v.released()),
            "sibling layer killed its twin"
        );
        // A later note in the class still fades both layers
        ch.note_on(&tpls, 64, 100, None);
        assert!(ch.voices[0].released() && ch.voices[1].released());
        assert!(!ch.voices[2].released() && !ch.voices[3].released());
    }

    #[test]
    fn finished_voices_are_removed_after_render() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.note_on(&templates(), 60, 100, None);
        ch.kill_note(60);
        for _ in 0..12 {
            render(&mut ch, 128);
        }
        assert_eq!(ch.voice_count(), 0);
    }

    #[test]
    fn all_sound_off_is_immediate() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.note_on(&templates(), 60, 100, None);
        ch.note_on(&templates(), 62, 100, None);
        ch.controller_change(CC_ALL_SOUND_OFF, 0);
        assert!(ch.voices.iter().all(|v| v.released()));
        for _ in 0..12 {
            render(&mut ch, 128);
        }
        assert_eq!(ch.voice_count(), 0);
    }

    #[test]
    fn locked_controller_ignores_writes() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.controller_change(7, 100);
        ch.lock_controller(7, true);
        ch.controller_change(7, 10);
        assert_eq!(ch.cc(7), 100);
    }

    #[test]
    fn key_shift_applies_to_on_and_off() {
        let mut ch = Channel::new(44_100.0, 0, 128);
        ch.key_shift = 12;
        ch.note_on(&templates(), 60, 100, None);
        assert_eq!(ch.voices[0].key, 72);
        ch.note_off(60);
        assert!(ch.voices[0].released());
    }
}
