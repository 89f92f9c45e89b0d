// Unit converters for the SoundFont generator domain.
//
// Generators express time in timecents, frequency in absolute cents and
// attenuation in centibels. All three conversions are exponentials, so the
// integer musical ranges are precomputed once into shared tables and the
// hot paths reduce to an indexed load. Out-of-range inputs fall back to the
// closed-form expression.

use once_cell::sync::Lazy;

/// 8.176 Hz is the frequency of MIDI key 0; absolute cents count up from it.
pub const ABS_CENT_BASE_HZ: f32 = 8.175_798_9;

const TIMECENT_MIN: i32 = -12_000;
const TIMECENT_MAX: i32 = 8_000;
const ABS_CENT_MAX: i32 = 16_000;
const CENTIBEL_MAX: i32 = 1_600;

static TIMECENT_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (TIMECENT_MIN..=TIMECENT_MAX)
        .map(|tc| 2.0_f32.powf(tc as f32 / 1200.0))
        .collect()
});

static ABS_CENT_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..=ABS_CENT_MAX)
        .map(|c| ABS_CENT_BASE_HZ * 2.0_f32.powf(c as f32 / 1200.0))
        .collect()
});

static CENTIBEL_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    (0..=CENTIBEL_MAX)
        .map(|cb| 10.0_f32.powf(-(cb as f32) / 200.0))
        .collect()
});

/// Timecents to seconds: `2^(tc / 1200)`. -12000 tc is ~1 ms, 0 tc is 1 s.
#[inline]
pub fn timecents_to_seconds(tc: i32) -> f32 {
    if (TIMECENT_MIN..=TIMECENT_MAX).contains(&tc) {
        TIMECENT_TABLE[(tc - TIMECENT_MIN) as usize]
    } else {
        2.0_f32.powf(tc as f32 / 1200.0)
    }
}

/// Absolute cents to Hz: `8.176 * 2^(cents / 1200)`.
#[inline]
pub fn abs_cents_to_hz(cents: i32) -> f32 {
    if (0..=ABS_CENT_MAX).contains(&cents) {
        ABS_CENT_TABLE[cents as usize]
    } else {
        ABS_CENT_BASE_HZ * 2.0_f32.powf(cents as f32 / 1200.0)
    }
}

/// Centibels of attenuation to linear gain: `10^(-cb / 200)`.
/// 10 cb = 1 dB, 1000 cb = -100 dB (perceptual silence).
#[inline]
pub fn centibels_to_gain(cb: i32) -> f32 {
    if (0..=CENTIBEL_MAX).contains(&cb) {
        CENTIBEL_TABLE[cb as usize]
    } else if cb < 0 {
        10.0_f32.powf(-(cb as f32) / 200.0)
    } else {
        0.0
    }
}

/// Decibels of attenuation to linear gain, for the fractional values the
/// volume envelope produces mid-ramp.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(-db / 20.0)
}

/// Cents to a frequency ratio: `2^(cents / 1200)`.
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}
