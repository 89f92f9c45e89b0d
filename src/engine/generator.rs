// The SF2 generator array: every synthesis parameter of a voice lives at a
// fixed index in a 61-entry table of 16-bit values. A voice carries two
// copies: the base values resolved from the zones, and the live "modulated"
// values recomputed by the modulator engine. Modulated values are clamped to
// the per-generator published range after every recompute.

pub const GEN_COUNT: usize = 61;

/// Generator indices per SoundFont 2.04 section 8.1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gen {
    StartAddrsOffset = 0,
    EndAddrsOffset = 1,
    StartLoopAddrsOffset = 2,
    EndLoopAddrsOffset = 3,
    StartAddrsCoarseOffset = 4,
    ModLfoToPitch = 5,
    VibLfoToPitch = 6,
    ModEnvToPitch = 7,
    InitialFilterFc = 8,
    InitialFilterQ = 9,
    ModLfoToFilterFc = 10,
    ModEnvToFilterFc = 11,
    EndAddrsCoarseOffset = 12,
    ModLfoToVolume = 13,
    Unused1 = 14,
    ChorusEffectsSend = 15,
    ReverbEffectsSend = 16,
    Pan = 17,
    Unused2 = 18,
    Unused3 = 19,
    Unused4 = 20,
    DelayModLfo = 21,
    FreqModLfo = 22,
    DelayVibLfo = 23,
    FreqVibLfo = 24,
    DelayModEnv = 25,
    AttackModEnv = 26,
    HoldModEnv = 27,
    DecayModEnv = 28,
    SustainModEnv = 29,
    ReleaseModEnv = 30,
    KeynumToModEnvHold = 31,
    KeynumToModEnvDecay = 32,
    DelayVolEnv = 33,
    AttackVolEnv = 34,
    HoldVolEnv = 35,
    DecayVolEnv = 36,
    SustainVolEnv = 37,
    ReleaseVolEnv = 38,
    KeynumToVolEnvHold = 39,
    KeynumToVolEnvDecay = 40,
    Instrument = 41,
    Reserved1 = 42,
    KeyRange = 43,
    VelRange = 44,
    StartLoopAddrsCoarseOffset = 45,
    Keynum = 46,
    Velocity = 47,
    InitialAttenuation = 48,
    Reserved2 = 49,
    EndLoopAddrsCoarseOffset = 50,
    CoarseTune = 51,
    FineTune = 52,
    SampleId = 53,
    SampleModes = 54,
    Reserved3 = 55,
    ScaleTuning = 56,
    ExclusiveClass = 57,
    OverridingRootKey = 58,
    Unused5 = 59,
    EndOper = 60,
}

impl Gen {
    #[inline]
    pub const fn idx(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenRange {
    pub min: i16,
    pub max: i16,
    pub default: i16,
}

const fn r(min: i16, max: i16, default: i16) -> GenRange {
    GenRange { min, max, default }
}

/// Published min/max/default per generator (SF2 2.04 section 8.1.3).
/// Address offsets are unbounded in the file format; the sample cursor is
/// re-clamped into the sample after they are applied, so the full i16 range
/// is legal here.
pub static GEN_RANGES: [GenRange; GEN_COUNT] = [
    r(i16::MIN, i16::MAX, 0),  // startAddrsOffset
    r(i16::MIN, i16::MAX, 0),  // endAddrsOffset
    r(i16::MIN, i16::MAX, 0),  // startloopAddrsOffset
    r(i16::MIN, i16::MAX, 0),  // endloopAddrsOffset
    r(i16::MIN, i16::MAX, 0),  // startAddrsCoarseOffset
    r(-12000, 12000, 0),       // modLfoToPitch
    r(-12000, 12000, 0),       // vibLfoToPitch
    r(-12000, 12000, 0),       // modEnvToPitch
    r(1500, 13500, 13500),     // initialFilterFc
    r(0, 960, 0),              // initialFilterQ
    r(-12000, 12000, 0),       // modLfoToFilterFc
    r(-12000, 12000, 0),       // modEnvToFilterFc
    r(i16::MIN, i16::MAX, 0),  // endAddrsCoarseOffset
    r(-960, 960, 0),           // modLfoToVolume
    r(0, 0, 0),                // unused1
    r(0, 1000, 0),             // chorusEffectsSend
    r(0, 1000, 0),             // reverbEffectsSend
    r(-500, 500, 0),           // pan
    r(0, 0, 0),                // unused2
    r(0, 0, 0),                // unused3
    r(0, 0, 0),                // unused4
    r(-12000, 5000, -12000),   // delayModLFO
    r(-16000, 4500, 0),        // freqModLFO
    r(-12000, 5000, -12000),   // delayVibLFO
    r(-16000, 4500, 0),        // freqVibLFO
    r(-12000, 5000, -12000),   // delayModEnv
    r(-12000, 8000, -12000),   // attackModEnv
    r(-12000, 5000, -12000),   // holdModEnv
    r(-12000, 8000, -12000),   // decayModEnv
    r(0, 1000, 0),             // sustainModEnv
    r(-12000, 8000, -12000),   // releaseModEnv
    r(-1200, 1200, 0),         // keynumToModEnvHold
    r(-1200, 1200, 0),         // keynumToModEnvDecay
    r(-12000, 5000, -12000),   // delayVolEnv
    r(-12000, 8000, -12000),   // attackVolEnv
    r(-12000, 5000, -12000),   // holdVolEnv
    r(-12000, 8000, -12000),   // decayVolEnv
    r(0, 1440, 0),             // sustainVolEnv
    r(-12000, 8000, -12000),   // releaseVolEnv
    r(-1200, 1200, 0),         // keynumToVolEnvHold
    r(-1200, 1200, 0),         // keynumToVolEnvDecay
    r(i16::MIN, i16::MAX, -1), // instrument (unused by the core)
    r(0, 0, 0),                // reserved1
    r(i16::MIN, i16::MAX, 0),  // keyRange (resolved by the preset source)
    r(i16::MIN, i16::MAX, 0),  // velRange (resolved by the preset source)
    r(i16::MIN, i16::MAX, 0),  // startloopAddrsCoarseOffset
    r(-1, 127, -1),            // keynum
    r(-1, 127, -1),            // velocity
    r(0, 1440, 0),             // initialAttenuation
    r(0, 0, 0),                // reserved2
    r(i16::MIN, i16::MAX, 0),  // endloopAddrsCoarseOffset
    r(-120, 120, 0),           // coarseTune
    r(-99, 99, 0),             // fineTune
    r(i16::MIN, i16::MAX, -1), // sampleID (unused by the core)
    r(0, 3, 0),                // sampleModes
    r(0, 0, 0),                // reserved3
    r(0, 1200, 100),           // scaleTuning
    r(0, 127, 0),              // exclusiveClass
    r(-1, 127, -1),            // overridingRootKey
    r(0, 0, 0),                // unused5
    r(0, 0, 0),                // endOper
];

pub fn default_generators() -> [i16; GEN_COUNT] {
    let mut out = [0i16; GEN_COUNT];
    for (i, range) in GEN_RANGES.iter().enumerate() {
        out[i] = range.default;
    }
    out
}

/// The live generator pair of one voice: resolved base values plus the
/// modulated copy the render path actually reads.
#[derive(Debug, Clone)]
pub struct GeneratorSet {
    pub base: [i16; GEN_COUNT],
    pub modulated: [i16; GEN_COUNT],
}

impl GeneratorSet {
    pub fn new(base: [i16; GEN_COUNT]) -> Self {
        Self {
            modulated: base,
            base,
        }
    }

    #[inline]
    pub fn get(&self, gen: Gen) -> i16 {
        self.modulated[gen.idx()]
    }

    #[inline]
    pub fn base(&self, gen: Gen) -> i16 {
        self.base[gen.idx()]
    }

    /// Write one destination from an i32 sum. AWE-style NRPN offsets stacked
    /// on SF2 modulators can overflow 16 bits mid-sum, so the value is first
    /// clamped to the i16 range and only then to the published min/max.
    #[inline]
    pub fn set_clamped(&mut self, dest: usize, summed: i32) {
        let range = &GEN_RANGES[dest];
        let v = summed.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        self.modulated[dest] = v.clamp(range.min, range.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_range() {
        let gens = default_generators();
        for (i, range) in GEN_RANGES.iter().enumerate() {
            assert!(
                gens[i] >= range.min && gens[i] <= range.max,
                "generator {} default out of range",
                i
            );
        }
    }

    #[test]
    fn overflow_clamps_before_range() {
        let mut set = GeneratorSet::new(default_generators());
        // Way past i16 range; must not wrap around
        set.set_clamped(Gen::InitialFilterFc.idx(), 1_000_000);
        assert_eq!(set.get(Gen::InitialFilterFc), 13_500);
        set.set_clamped(Gen::InitialFilterFc.idx(), -1_000_000);
        assert_eq!(set.get(Gen::InitialFilterFc), 1_500);
    }

    #[test]
    fn pan_range() {
        let mut set = GeneratorSet::new(default_generators());
        set.set_clamped(Gen::Pan.idx(), 740);
        assert_eq!(set.get(Gen::Pan), 500);
        set.set_clamped(Gen::Pan.idx(), -740);
        assert_eq!(set.get(Gen::Pan), -500);
    }
}
