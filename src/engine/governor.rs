// Polyphony cap enforcement. When a note-on pushes the global voice count
// past the cap, every active voice gets a priority score and the lowest
// scorers are hard-removed (not released) so capacity is back immediately.
// Greedy and tie-broken by list order, not globally optimal.

use log::debug;

use crate::engine::voice::Voice;

const DRUM_BONUS: f32 = 5.0;
const RELEASE_PENALTY: f32 = 5.0;
const VELOCITY_WEIGHT: f32 = 1.0;
const ENVELOPE_WEIGHT: f32 = 1.0;
const ATTENUATION_WEIGHT: f32 = 0.01;

/// Priority of one voice; higher survives longer. Drum hits keep their
/// transients, releasing and quiet voices go first, fresh loud notes stay.
pub fn score_voice(voice: &Voice, drum: bool) -> f32 {
    let mut score = 0.0;
    if drum {
        score += DRUM_BONUS;
    }
    if voice.released() {
        score -= RELEASE_PENALTY;
    }
    score += voice.velocity as f32 / 127.0 * VELOCITY_WEIGHT;
    score += (1.0 - voice.envelope_progress()) * ENVELOPE_WEIGHT;
    score -= voice.attenuation_db() * ATTENUATION_WEIGHT;
    score
}

/// Indices of the `count` lowest-scoring entries, ascending. The sort is
/// stable, so equal scores evict in list order.
pub fn select_victims(scores: &[f32], count: usize) -> Vec<usize> {
    if count == 0 || scores.is_empty() {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut victims: Vec<usize> = order.into_iter().take(count.min(scores.len())).collect();
    victims.sort_unstable();
    debug!("governor evicting {} of {} voices", victims.len(), scores.len());
    victims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{SampleData, VoiceTemplate};
    use crate::engine::generator::{default_generators, Gen};
    use std::sync::Arc;

    fn voice(velocity: u8) -> Voice {
        let frames: Vec<f32> = vec![0.0; 256];
        let sample = Arc::new(SampleData::new(frames, 44_100.0, 60, 0, 0, 255));
        let mut gens = default_generators();
        gens[Gen::SampleModes.idx()] = 1;
        let tpl = VoiceTemplate {
            sample,
            generators: gens,
            modulators: Vec::new(),
        };
        Voice::from_template(&tpl, &[], 60, velocity, 0.0, 44_100.0)
    }

    #[test]
    fn evicts_exactly_n_lowest_preserving_order() {
        let scores = vec![0.9, 0.1, 0.5, 0.05, 0.8, 0.3, 0.7, 0.2, 0.6, 0.4];
        let victims = select_victims(&scores, 3);
        assert_eq!(victims, vec![1, 3, 7]);
    }

    #[test]
    fn ties_break_by_list_order() {
        let scores = vec![0.5, 0.5, 0.5, 0.5];
        assert_eq!(select_victims(&scores, 2), vec![0, 1]);
    }

    #[test]
    fn released_voice_scores_below_held_voice() {
        let held = voice(100);
        let mut releasing = voice(100);
        releasing.release();
        assert!(score_voice(&releasing, false) < score_voice(&held, false));
    }

    #[test]
    fn drum_voice_outranks_melodic_voice() {
        let melodic = voice(100);
        let drum = voice(100);
        assert!(score_voice(&drum, true) > score_voice(&melodic, false));
    }

    #[test]
    fn louder_velocity_scores_higher() {
        let quiet = voice(20);
        let loud = voice(127);
        assert!(score_voice(&loud, false) > score_voice(&quiet, false));
    }

    #[test]
    fn zero_count_is_noop() {
        assert!(select_victims(&[1.0, 2.0], 0).is_empty());
    }
}
