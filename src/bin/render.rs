// Offline demo host: builds a small in-memory bank, plays a short phrase
// through the synthesizer with reverb and chorus on the send buses, and
// writes the result to a WAV file.
//
// Usage: render [output.wav]

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use sfsynth::engine::dsp::chorus::Chorus;
use sfsynth::engine::dsp::reverb::Reverb;
use sfsynth::engine::generator::Gen;
use sfsynth::{
    BankSource, PresetSource, SampleData, SynthConfig, Synthesizer, VoiceTemplate,
};

const SR: f32 = 44_100.0;
const BLOCK: usize = 128;

/// One looped band-limited-ish sawtooth zone across the whole keyboard.
struct SawPreset {
    template: VoiceTemplate,
}

impl PresetSource for SawPreset {
    fn id(&self) -> u32 {
        0
    }

    fn voice_parameters(&self, _key: u8, _velocity: u8) -> Vec<VoiceTemplate> {
        vec![self.template.clone()]
    }

    fn name(&self) -> &str {
        "saw"
    }
}

struct DemoBank {
    preset: Arc<SawPreset>,
}

impl BankSource for DemoBank {
    fn preset(&self, _bank: u8, _program: u8) -> Option<Arc<dyn PresetSource>> {
        Some(Arc::clone(&self.preset) as Arc<dyn PresetSource>)
    }
}

fn demo_bank() -> Arc<DemoBank> {
    // A couple of saw cycles at the root pitch of key 60, looped
    let period = (SR / 261.63) as usize;
    let cycles = 8;
    let frames: Vec<f32> = (0..period * cycles)
        .map(|i| {
            let phase = (i % period) as f32 / period as f32;
            (phase * 2.0 - 1.0) * 0.4
        })
        .collect();
    let len = frames.len() as u32;
    let sample = Arc::new(SampleData::new(frames, SR, 60, 0, period as u32, len - 1));

    let mut template = VoiceTemplate::from_sample(sample);
    template.generators[Gen::SampleModes.idx()] = 1;
    template.generators[Gen::AttackVolEnv.idx()] = -7200; // ~16 ms
    template.generators[Gen::ReleaseVolEnv.idx()] = -3600; // ~125 ms
    template.generators[Gen::InitialFilterFc.idx()] = 9500;
    template.generators[Gen::InitialFilterQ.idx()] = 100;
    template.generators[Gen::ReverbEffectsSend.idx()] = 250;
    template.generators[Gen::ChorusEffectsSend.idx()] = 150;

    Arc::new(DemoBank {
        preset: Arc::new(SawPreset { template }),
    })
}

fn main() -> Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "render.wav".to_string());

    let mut synth = Synthesizer::new(SynthConfig {
        sample_rate: SR,
        block_size: BLOCK,
        ..SynthConfig::default()
    })?;
    synth.set_bank(demo_bank());

    let mut reverb = Reverb::new(SR);
    reverb.set_time(1.8);
    reverb.set_level(0.9);
    let mut chorus = Chorus::new(SR);
    chorus.set_level(0.7);

    // (start beat, duration beats, key, velocity)
    let phrase: &[(f32, f32, u8, u8)] = &[
        (0.0, 1.0, 48, 100),
        (0.0, 2.0, 60, 90),
        (1.0, 1.0, 64, 85),
        (2.0, 1.0, 67, 95),
        (3.0, 1.5, 72, 110),
    ];
    let beat_seconds = 0.4;
    let total_seconds = 4.0 * beat_seconds + 2.0;
    let total_samples = (total_seconds * SR) as usize;

    let mut out_l = vec![0.0f32; total_samples];
    let mut out_r = vec![0.0f32; total_samples];

    let mut rev_l = vec![0.0f32; BLOCK];
    let mut rev_r = vec![0.0f32; BLOCK];
    let mut cho_l = vec![0.0f32; BLOCK];
    let mut cho_r = vec![0.0f32; BLOCK];

    let mut cursor = 0usize;
    while cursor < total_samples {
        let n = BLOCK.min(total_samples - cursor);
        let t0 = cursor as f32 / SR;
        let t1 = (cursor + n) as f32 / SR;

        for &(start, dur, key, vel) in phrase {
            let on = start * beat_seconds;
            let off = (start + dur) * beat_seconds;
            if on >= t0 && on < t1 {
                synth.note_on(0, key, vel);
            }
            if off >= t0 && off < t1 {
                synth.note_off(0, key);
            }
        }

        rev_l[..n].fill(0.0);
        rev_r[..n].fill(0.0);
        cho_l[..n].fill(0.0);
        cho_r[..n].fill(0.0);
        {
            let (l, r) = (&mut out_l[cursor..cursor + n], &mut out_r[cursor..cursor + n]);
            synth.render_audio(
                l,
                r,
                &mut rev_l[..n],
                &mut rev_r[..n],
                &mut cho_l[..n],
                &mut cho_r[..n],
                0,
                n,
            );
            reverb.process_block(&rev_l[..n], &rev_r[..n], l, r);
            chorus.process_block(&cho_l[..n], &cho_r[..n], l, r);
        }
        cursor += n;
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SR as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(&path, spec).with_context(|| format!("creating {path}"))?;
    for i in 0..total_samples {
        let l = (out_l[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        let r = (out_r[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(l)?;
        writer.write_sample(r)?;
    }
    writer.finalize()?;

    info!("wrote {} samples to {path}", total_samples);
    Ok(())
}
