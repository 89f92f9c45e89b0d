// The synthesizer facade: owns the channels, the bank binding, the
// voice-prototype cache and the polyphony governor, and exposes the
// MIDI-facing surface plus the additive block render.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bank::{BankSource, EmptyPreset, PresetSource, TuningSource, VoiceTemplate};
use crate::engine::channel::{Channel, RenderBufs};
use crate::engine::governor::{score_voice, select_victims};
use crate::engine::oscillator::Interpolation;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: f32,
    pub block_size: usize,
    pub voice_cap: usize,
    pub channel_count: usize,
    pub interpolation: Interpolation,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            block_size: 128,
            voice_cap: 64,
            channel_count: 16,
            interpolation: Interpolation::Linear,
        }
    }
}

/// Fire-and-forget notifications for a host UI or sequencer. No reply is
/// expected and the hook must not block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SynthEvent {
    NoteOn { channel: usize, key: u8, velocity: u8 },
    NoteOff { channel: usize, key: u8 },
    ControllerChange { channel: usize, cc: u8, value: u8 },
    ProgramChange { channel: usize, program: u8 },
    PitchWheel { channel: usize, value: i16 },
    ChannelPressure { channel: usize, value: u8 },
    VoicesStolen { count: usize },
}

type EventHook = Box<dyn FnMut(&SynthEvent) + Send>;

struct ChannelSlot {
    channel: Channel,
    preset: Arc<dyn PresetSource>,
    program: u8,
}

pub struct Synthesizer {
    config: SynthConfig,
    slots: Vec<ChannelSlot>,
    bank: Option<Arc<dyn BankSource>>,
    tuning: Option<Arc<dyn TuningSource>>,
    prototypes: HashMap<(u32, u8, u8), Arc<[VoiceTemplate]>>,
    hook: Option<EventHook>,
}

impl Synthesizer {
    pub fn new(config: SynthConfig) -> Result<Self, SynthError> {
        if config.sample_rate <= 0.0 {
            return Err(SynthError::InvalidConfig(format!(
                "sample rate {} must be positive",
                config.sample_rate
            )));
        }
        if config.block_size == 0 || config.channel_count == 0 {
            return Err(SynthError::InvalidConfig(
                "block size and channel count must be nonzero".into(),
            ));
        }
        let slots = (0..config.channel_count)
            .map(|i| ChannelSlot {
                channel: Channel::new(config.sample_rate, i, config.block_size),
                preset: Arc::new(EmptyPreset),
                program: 0,
            })
            .collect();
        Ok(Self {
            config,
            slots,
            bank: None,
            tuning: None,
            prototypes: HashMap::new(),
            hook: None,
        })
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Bind a bank and re-resolve every channel's program against it. The
    /// prototype cache is dropped since its ids belong to the old bank.
    pub fn set_bank(&mut self, bank: Arc<dyn BankSource>) {
        self.bank = Some(bank);
        self.prototypes.clear();
        for i in 0..self.slots.len() {
            let program = self.slots[i].program;
            self.bind_program(i, program);
        }
    }

    pub fn set_tuning(&mut self, tuning: Arc<dyn TuningSource>) {
        self.tuning = Some(tuning);
    }

    pub fn set_event_hook(&mut self, hook: EventHook) {
        self.hook = Some(hook);
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut Channel> {
        self.slots.get_mut(channel).map(|s| &mut s.channel)
    }

    pub fn channel(&self, channel: usize) -> Option<&Channel> {
        self.slots.get(channel).map(|s| &s.channel)
    }

    fn emit(&mut self, event: SynthEvent) {
        if let Some(hook) = &mut self.hook {
            hook(&event);
        }
    }

    fn valid_note(channel: usize, key: u8, channels: usize) -> bool {
        if channel >= channels {
            warn!("channel {channel} out of range, event ignored");
            return false;
        }
        if key > 127 {
            warn!("note {key} outside 0-127, event ignored");
            return false;
        }
        true
    }

    pub fn note_on(&mut self, channel: usize, key: u8, velocity: u8) {
        if !Self::valid_note(channel, key, self.slots.len()) {
            return;
        }
        if velocity == 0 {
            self.note_off(channel, key);
            return;
        }
        let velocity = velocity & 127;

        let real_key = self.slots[channel].channel.real_key(key);
        let preset_id = self.slots[channel].preset.id();
        let templates = match self.prototypes.get(&(preset_id, real_key, velocity)) {
            Some(t) => Arc::clone(t),
            None => {
                let t: Arc<[VoiceTemplate]> = self.slots[channel]
                    .preset
                    .voice_parameters(real_key, velocity)
                    .into();
                self.prototypes
                    .insert((preset_id, real_key, velocity), Arc::clone(&t));
                t
            }
        };

        let program = self.slots[channel].program;
        let tuning = self
            .tuning
            .as_ref()
            .and_then(|t| t.tuning(program, real_key));

        self.slots[channel]
            .channel
            .note_on(&templates, key, velocity, tuning);
        self.emit(SynthEvent::NoteOn {
            channel,
            key,
            velocity,
        });
        self.enforce_voice_cap();
    }

    pub fn note_off(&mut self, channel: usize, key: u8) {
        if !Self::valid_note(channel, key, self.slots.len()) {
            return;
        }
        self.slots[channel].channel.note_off(key);
        self.emit(SynthEvent::NoteOff { channel, key });
    }

    pub fn kill_note(&mut self, channel: usize, key: u8) {
        if !Self::valid_note(channel, key, self.slots.len()) {
            return;
        }
        self.slots[channel].channel.kill_note(key);
    }

    pub fn controller_change(&mut self, channel: usize, cc: u8, value: u8) {
        let Some(slot) = self.slots.get_mut(channel) else {
            warn!("channel {channel} out of range, event ignored");
            return;
        };
        slot.channel.controller_change(cc, value);
        self.emit(SynthEvent::ControllerChange { channel, cc, value });
    }

    pub fn program_change(&mut self, channel: usize, program: u8) {
        if channel >= self.slots.len() {
            warn!("channel {channel} out of range, event ignored");
            return;
        }
        self.bind_program(channel, program);
        self.emit(SynthEvent::ProgramChange { channel, program });
    }

    fn bind_program(&mut self, channel: usize, program: u8) {
        let slot = &mut self.slots[channel];
        slot.program = program;
        let bank_select = (slot.channel.cc(0) & 127) as u8;
        let resolved = self
            .bank
            .as_ref()
            .and_then(|b| b.preset(bank_select, program));
        slot.preset = match resolved {
            Some(p) => p,
            None => {
                warn!(
                    "no preset for bank {bank_select} program {program} on channel {channel}, \
                     substituting empty preset"
                );
                Arc::new(EmptyPreset)
            }
        };
    }

    pub fn pitch_wheel(&mut self, channel: usize, value: i16) {
        let Some(slot) = self.slots.get_mut(channel) else {
            warn!("channel {channel} out of range, event ignored");
            return;
        };
        slot.channel.pitch_wheel(value);
        self.emit(SynthEvent::PitchWheel { channel, value });
    }

    pub fn channel_pressure(&mut self, channel: usize, value: u8) {
        let Some(slot) = self.slots.get_mut(channel) else {
            warn!("channel {channel} out of range, event ignored");
            return;
        };
        slot.channel.channel_pressure(value);
        self.emit(SynthEvent::ChannelPressure { channel, value });
    }

    pub fn poly_pressure(&mut self, channel: usize, key: u8, value: u8) {
        if !Self::valid_note(channel, key, self.slots.len()) {
            return;
        }
        self.slots[channel].channel.poly_pressure(key, value);
    }

    pub fn stop_all_notes(&mut self, force: bool) {
        for slot in &mut self.slots {
            slot.channel.stop_all_notes(force);
        }
    }

    pub fn voice_count(&self) -> usize {
        self.slots.iter().map(|s| s.channel.voice_count()).sum()
    }

    /// Hard-remove the lowest-priority voices once the cap is exceeded.
    fn enforce_voice_cap(&mut self) {
        let total = self.voice_count();
        if total <= self.config.voice_cap {
            return;
        }
        let excess = total - self.config.voice_cap;

        // Score across all channels in list order: active then sustained
        let mut scores = Vec::with_capacity(total);
        let mut origin = Vec::with_capacity(total);
        for (ci, slot) in self.slots.iter().enumerate() {
            let drum = slot.channel.drum;
            for (vi, v) in slot.channel.voices.iter().enumerate() {
                scores.push(score_voice(v, drum));
                origin.push((ci, false, vi));
            }
            for (vi, v) in slot.channel.sustained.iter().enumerate() {
                scores.push(score_voice(v, drum));
                origin.push((ci, true, vi));
            }
        }

        let victims = select_victims(&scores, excess);
        // Remove back-to-front so earlier indices stay valid
        for &i in victims.iter().rev() {
            let (ci, sustained, vi) = origin[i];
            let ch = &mut self.slots[ci].channel;
            if sustained {
                ch.sustained.remove(vi);
            } else {
                ch.voices.remove(vi);
            }
        }
        self.emit(SynthEvent::VoicesStolen {
            count: victims.len(),
        });
    }

    /// Render `count` samples starting at `start` into the six buses.
    /// Writes are additive; the caller owns clearing and the effect
    /// processors fed from the send buses.
    #[allow(clippy::too_many_arguments)]
    pub fn render_audio(
        &mut self,
        out_l: &mut [f32],
        out_r: &mut [f32],
        rev_l: &mut [f32],
        rev_r: &mut [f32],
        cho_l: &mut [f32],
        cho_r: &mut [f32],
        start: usize,
        count: usize,
    ) {
        let end = start + count;
        if end > out_l.len() {
            warn!(
                "render span {start}..{end} exceeds buffer length {}, truncating",
                out_l.len()
            );
        }
        let end = end.min(out_l.len());
        if start >= end {
            return;
        }
        let interpolation = self.config.interpolation;
        for slot in &mut self.slots {
            let mut bufs = RenderBufs {
                out_l: &mut out_l[start..end],
                out_r: &mut out_r[start..end],
                rev_l: &mut rev_l[start..end],
                rev_r: &mut rev_r[start..end],
                cho_l: &mut cho_l[start..end],
                cho_r: &mut cho_r[start..end],
            };
            slot.channel.render_block(&mut bufs, interpolation);
        }
    }
}
