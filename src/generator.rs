//! Stimulus sequence generation with controlled n-back match injection.

use rand::Rng;

use crate::config::{
    Channel, GameConfig, COLOR_COUNT, CONSONANTS, GRID_CELLS, MATCH_INJECTION_PROBABILITY,
    SHAPE_COUNT, TONE_COUNT,
};
use crate::stimulus::{ChannelValue, StimulusPacket};

/// Generates the full ordered stimulus sequence for one session.
///
/// Each active channel is drawn independently and gets its own injection pass,
/// so channels are not forced to match at the same indices. The random source
/// is injected: production callers pass `rand::rng()`, tests pass a seeded
/// `StdRng` so match-rate statistics are reproducible.
pub fn generate<R: Rng>(config: &GameConfig, rng: &mut R, session_start_ms: u64) -> Vec<StimulusPacket> {
    let channels = config.mode.channels();
    let block_size = config.block_size as usize;

    let per_channel: Vec<Vec<ChannelValue>> = channels
        .iter()
        .map(|&c| {
            let mut seq: Vec<ChannelValue> =
                (0..block_size).map(|_| draw_value(c, rng)).collect();
            inject_matches(&mut seq, config.n_level as usize, rng);
            seq
        })
        .collect();

    let isi_ms = config.isi_ms();
    (0..block_size)
        .map(|i| StimulusPacket {
            index: i as u32,
            values: per_channel.iter().map(|seq| seq[i]).collect(),
            scheduled_ts_ms: session_start_ms + i as u64 * isi_ms,
        })
        .collect()
}

fn draw_value<R: Rng>(channel: Channel, rng: &mut R) -> ChannelValue {
    match channel {
        Channel::Position => ChannelValue::Position(rng.random_range(0..GRID_CELLS)),
        Channel::Letter => {
            ChannelValue::Letter(CONSONANTS[rng.random_range(0..CONSONANTS.len())])
        }
        Channel::Color => ChannelValue::Color(rng.random_range(0..COLOR_COUNT)),
        Channel::Tone => ChannelValue::Tone(rng.random_range(0..TONE_COUNT)),
        Channel::Shape => ChannelValue::Shape(rng.random_range(0..SHAPE_COUNT)),
    }
}

/// For every index past the lag window, overwrite with the value n trials back
/// at the configured probability, creating a deliberate match.
fn inject_matches<R: Rng>(seq: &mut [ChannelValue], n_level: usize, rng: &mut R) {
    for i in n_level..seq.len() {
        if rng.random_bool(MATCH_INJECTION_PROBABILITY) {
            seq[i] = seq[i - n_level];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(n_level: u32, block_size: u32) -> GameConfig {
        let mut c = GameConfig::new(Mode::Dual, n_level);
        c.block_size = block_size;
        c
    }

    #[test]
    fn sequence_has_block_size_packets_in_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let seq = generate(&config(2, 20), &mut rng, 0);
        assert_eq!(seq.len(), 20);
        for (i, packet) in seq.iter().enumerate() {
            assert_eq!(packet.index, i as u32);
            assert_eq!(packet.values.len(), 2);
        }
    }

    #[test]
    fn scheduled_timestamps_step_by_isi() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut c = config(2, 5);
        c.isi_seconds = 2.5;
        let seq = generate(&c, &mut rng, 1_000);
        let ts: Vec<u64> = seq.iter().map(|p| p.scheduled_ts_ms).collect();
        assert_eq!(ts, vec![1_000, 3_500, 6_000, 8_500, 11_000]);
    }

    #[test]
    fn same_seed_reproduces_sequence() {
        let c = config(3, 40);
        let a = generate(&c, &mut StdRng::seed_from_u64(99), 0);
        let b = generate(&c, &mut StdRng::seed_from_u64(99), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn match_rate_consistent_with_injection_probability() {
        // Chance matches plus injected matches: for the position channel
        // (9-cell grid) the expected per-trial match rate is
        // p + (1-p)/9 ~ 0.378. Average over many blocks and allow a
        // generous band.
        let c = config(2, 100);
        let mut rng = StdRng::seed_from_u64(1234);
        let mut matches = 0u32;
        let mut scorable = 0u32;
        for _ in 0..200 {
            let seq = generate(&c, &mut rng, 0);
            for i in (c.n_level as usize)..seq.len() {
                scorable += 1;
                if seq[i].value_for(Channel::Position)
                    == seq[i - c.n_level as usize].value_for(Channel::Position)
                {
                    matches += 1;
                }
            }
        }
        let rate = matches as f64 / scorable as f64;
        assert!((0.33..0.43).contains(&rate), "match rate {rate}");
    }
}
