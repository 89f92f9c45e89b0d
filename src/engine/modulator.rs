// The SF2 modulator engine. A modulator maps one or two controller sources
// through a normalized curve into an additive offset on one generator. The
// engine supports a full recompute (note-on) and an incremental recompute
// keyed by a single changed source (controller / pitch-wheel messages), and
// both must agree on every destination the changed source touches.

use once_cell::sync::Lazy;

use super::generator::{Gen, GeneratorSet, GEN_COUNT};

const CURVE_STEPS: usize = 1024;

// Curve shapes per SF2 2.04 section 9.5.1, tabulated over [0, 1].
// concave rises slowly then steeply (attenuation-style), convex is its
// mirror. Both are the -20/96 * log10 family.
static CONCAVE_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..=CURVE_STEPS)
        .map(|i| {
            let x = i as f32 / CURVE_STEPS as f32;
            if x >= 1.0 {
                1.0
            } else {
                (-20.0 / 96.0 * ((1.0 - x) * (1.0 - x)).log10()).clamp(0.0, 1.0)
            }
        })
        .collect()
});

static CONVEX_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..=CURVE_STEPS)
        .map(|i| {
            let x = i as f32 / CURVE_STEPS as f32;
            if x <= 0.0 {
                0.0
            } else {
                (1.0 + 20.0 / 96.0 * (x * x).log10()).clamp(0.0, 1.0)
            }
        })
        .collect()
});

#[inline]
pub fn concave(x: f32) -> f32 {
    let i = (x.clamp(0.0, 1.0) * CURVE_STEPS as f32) as usize;
    CONCAVE_TABLE[i.min(CURVE_STEPS)]
}

#[inline]
pub fn convex(x: f32) -> f32 {
    let i = (x.clamp(0.0, 1.0) * CURVE_STEPS as f32) as usize;
    CONVEX_TABLE[i.min(CURVE_STEPS)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    Linear,
    Concave,
    Convex,
    Switch,
}

impl CurveType {
    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            CurveType::Linear => x,
            CurveType::Concave => concave(x),
            CurveType::Convex => convex(x),
            CurveType::Switch => {
                if x >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Non-CC source indices (SF2 2.04 section 8.2.1).
pub mod source_index {
    pub const NO_CONTROLLER: u8 = 0;
    pub const NOTE_ON_VELOCITY: u8 = 2;
    pub const NOTE_ON_KEY: u8 = 3;
    pub const POLY_PRESSURE: u8 = 10;
    pub const CHANNEL_PRESSURE: u8 = 13;
    pub const PITCH_WHEEL: u8 = 14;
    pub const PITCH_WHEEL_RANGE: u8 = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModSource {
    /// CC number when `is_cc`, otherwise a `source_index` constant.
    pub index: u8,
    pub is_cc: bool,
    /// Bipolar sources span -1..1, unipolar 0..1.
    pub bipolar: bool,
    /// Negative direction: the source reads max-to-min.
    pub negative: bool,
    pub curve: CurveType,
}

impl ModSource {
    pub const fn cc(index: u8, curve: CurveType, bipolar: bool, negative: bool) -> Self {
        Self {
            index,
            is_cc: true,
            bipolar,
            negative,
            curve,
        }
    }

    pub const fn fixed(index: u8, curve: CurveType, bipolar: bool, negative: bool) -> Self {
        Self {
            index,
            is_cc: false,
            bipolar,
            negative,
            curve,
        }
    }

    pub const fn none() -> Self {
        Self::fixed(source_index::NO_CONTROLLER, CurveType::Linear, false, false)
    }

    #[inline]
    pub fn matches(&self, is_cc: bool, index: u8) -> bool {
        self.is_cc == is_cc && self.index == index
    }

    /// Raw source value normalized into [0, 1] before polarity and curve.
    #[inline]
    fn raw(&self, ctx: &ModContext) -> f32 {
        if self.is_cc {
            return ctx.cc_normalized(self.index);
        }
        match self.index {
            source_index::NO_CONTROLLER => 1.0,
            source_index::NOTE_ON_VELOCITY => ctx.velocity as f32 / 127.0,
            source_index::NOTE_ON_KEY => ctx.key as f32 / 127.0,
            source_index::POLY_PRESSURE => ctx.poly_pressure as f32 / 127.0,
            source_index::CHANNEL_PRESSURE => ctx.channel_pressure as f32 / 127.0,
            source_index::PITCH_WHEEL => ctx.pitch_wheel as f32 / 16383.0,
            source_index::PITCH_WHEEL_RANGE => ctx.pitch_wheel_range as f32 / 127.0,
            _ => 0.0,
        }
    }

    /// Normalized, polarized, curved output: [0,1] unipolar or [-1,1] bipolar.
    #[inline]
    pub fn value(&self, ctx: &ModContext) -> f32 {
        let mut x = self.raw(ctx).clamp(0.0, 1.0);
        if self.negative {
            x = 1.0 - x;
        }
        if self.bipolar {
            // Curve each half symmetrically around the center
            let centered = 2.0 * x - 1.0;
            let mag = self.curve.apply(centered.abs());
            if centered < 0.0 {
                -mag
            } else {
                mag
            }
        } else {
            self.curve.apply(x)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Linear,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulator {
    pub source: ModSource,
    pub secondary: ModSource,
    pub amount: i16,
    pub transform: Transform,
    pub dest: Gen,
}

impl Modulator {
    #[inline]
    pub fn compute(&self, ctx: &ModContext) -> f32 {
        let v = self.amount as f32 * self.source.value(ctx) * self.secondary.value(ctx);
        match self.transform {
            Transform::Linear => v,
            Transform::Abs => v.abs(),
        }
    }

    /// Two modulators are "identical" for replacement purposes when their
    /// sources, transform and destination agree; the amount may differ.
    #[inline]
    pub fn same_identity(&self, other: &Modulator) -> bool {
        self.source == other.source
            && self.secondary == other.secondary
            && self.transform == other.transform
            && self.dest == other.dest
    }

    #[inline]
    pub fn uses_source(&self, is_cc: bool, index: u8) -> bool {
        self.source.matches(is_cc, index) || self.secondary.matches(is_cc, index)
    }
}

/// Controller state a modulator reads from; borrowed from the channel and
/// the voice for the duration of one recompute.
pub struct ModContext<'a> {
    pub controllers: &'a [i16; 128],
    pub velocity: u8,
    pub key: u8,
    pub poly_pressure: u8,
    pub channel_pressure: u8,
    pub pitch_wheel: i16,
    pub pitch_wheel_range: i16,
}

impl ModContext<'_> {
    #[inline]
    fn cc_normalized(&self, cc: u8) -> f32 {
        self.controllers[(cc & 127) as usize] as f32 / 16383.0
    }
}

/// Full recompute: copy base generators shifted by the NRPN offset table,
/// then add every modulator contribution, clamping each destination once at
/// the end.
pub fn recompute_all(
    gens: &mut GeneratorSet,
    mods: &[Modulator],
    offsets: &[i32; GEN_COUNT],
    ctx: &ModContext,
) {
    let mut sums = [0.0f32; GEN_COUNT];
    for m in mods {
        sums[m.dest.idx()] += m.compute(ctx);
    }
    for dest in 0..GEN_COUNT {
        // Truncation toward zero matches the integer semantics of the table
        let contribution = sums[dest] as i32;
        gens.set_clamped(dest, gens.base[dest] as i32 + offsets[dest] + contribution);
    }
}

/// Incremental recompute for one changed source: only destinations touched
/// by a modulator referencing that source are re-summed, and the re-sum runs
/// over every modulator sharing the destination so the result is identical
/// to a full recompute there.
pub fn recompute_source(
    gens: &mut GeneratorSet,
    mods: &[Modulator],
    offsets: &[i32; GEN_COUNT],
    ctx: &ModContext,
    is_cc: bool,
    index: u8,
) {
    let mut touched = [false; GEN_COUNT];
    for m in mods {
        if m.uses_source(is_cc, index) {
            touched[m.dest.idx()] = true;
        }
    }
    for dest in 0..GEN_COUNT {
        if !touched[dest] {
            continue;
        }
        let mut sum = 0.0f32;
        for m in mods {
            if m.dest.idx() == dest {
                sum += m.compute(ctx);
            }
        }
        gens.set_clamped(dest, gens.base[dest] as i32 + offsets[dest] + sum as i32);
    }
}

/// The default per-voice modulator list (SF2 2.04 section 8.4, minus the
/// link case). Pitch-wheel-to-pitch is handled by channel tuning rather than
/// a generator destination, since fineTune cannot hold a full bend range.
pub fn default_modulators() -> Vec<Modulator> {
    use source_index::*;
    vec![
        // 8.4.1 velocity -> initial attenuation
        Modulator {
            source: ModSource::fixed(NOTE_ON_VELOCITY, CurveType::Concave, false, true),
            secondary: ModSource::none(),
            amount: 960,
            transform: Transform::Linear,
            dest: Gen::InitialAttenuation,
        },
        // 8.4.2 velocity -> filter cutoff
        Modulator {
            source: ModSource::fixed(NOTE_ON_VELOCITY, CurveType::Linear, false, true),
            secondary: ModSource::none(),
            amount: -2400,
            transform: Transform::Linear,
            dest: Gen::InitialFilterFc,
        },
        // 8.4.3 channel pressure -> vibrato depth
        Modulator {
            source: ModSource::fixed(CHANNEL_PRESSURE, CurveType::Linear, false, false),
            secondary: ModSource::none(),
            amount: 50,
            transform: Transform::Linear,
            dest: Gen::VibLfoToPitch,
        },
        // 8.4.4 mod wheel -> vibrato depth
        Modulator {
            source: ModSource::cc(1, CurveType::Linear, false, false),
            secondary: ModSource::none(),
            amount: 50,
            transform: Transform::Linear,
            dest: Gen::VibLfoToPitch,
        },
        // 8.4.5 volume (CC7) -> initial attenuation
        Modulator {
            source: ModSource::cc(7, CurveType::Concave, false, true),
            secondary: ModSource::none(),
            amount: 960,
            transform: Transform::Linear,
            dest: Gen::InitialAttenuation,
        },
        // 8.4.6 pan (CC10) -> pan
        Modulator {
            source: ModSource::cc(10, CurveType::Linear, true, false),
            secondary: ModSource::none(),
            amount: 500,
            transform: Transform::Linear,
            dest: Gen::Pan,
        },
        // 8.4.7 expression (CC11) -> initial attenuation
        Modulator {
            source: ModSource::cc(11, CurveType::Concave, false, true),
            secondary: ModSource::none(),
            amount: 960,
            transform: Transform::Linear,
            dest: Gen::InitialAttenuation,
        },
        // 8.4.8 reverb send (CC91)
        Modulator {
            source: ModSource::cc(91, CurveType::Linear, false, false),
            secondary: ModSource::none(),
            amount: 200,
            transform: Transform::Linear,
            dest: Gen::ReverbEffectsSend,
        },
        // 8.4.9 chorus send (CC93)
        Modulator {
            source: ModSource::cc(93, CurveType::Linear, false, false),
            secondary: ModSource::none(),
            amount: 200,
            transform: Transform::Linear,
            dest: Gen::ChorusEffectsSend,
        },
    ]
}
