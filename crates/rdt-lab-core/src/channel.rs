//! Unreliable channel model.
//!
//! Every packet runs the same three stages, each gated by one random draw:
//! drop, delay, single-bit corruption. Draws are coarse on purpose: a source
//! yields one of `0.1, 0.2, ..., 1.0` and a stage fires when the draw is
//! `<= probability`, so a probability of `0.3` fires on exactly three of the
//! ten outcomes.

use std::collections::VecDeque;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdt_lab_abstract::ChannelParams;
use rdt_lab_abstract::packet::is_teardown;
use tracing::debug;

/// Bit pattern XORed into the damaged byte.
pub const CORRUPTION_MASK: u8 = 0x02;

/// A source of draws from `{0.1, 0.2, ..., 1.0}`.
pub trait RandomSource {
    fn draw(&mut self) -> f64;
}

/// Seedable ten-bucket generator.
pub struct TenthsRng {
    rng: StdRng,
}

impl TenthsRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }
}

impl RandomSource for TenthsRng {
    fn draw(&mut self) -> f64 {
        f64::from(self.rng.random_range(1..=10u8)) / 10.0
    }
}

/// Replays a fixed list of draws, then keeps returning `1.0` (which only a
/// probability of `1.0` fires on).
#[derive(Debug, Default)]
pub struct ScriptedDraws {
    draws: VecDeque<f64>,
}

impl ScriptedDraws {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }
}

impl RandomSource for ScriptedDraws {
    fn draw(&mut self) -> f64 {
        self.draws.pop_front().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The packet reaches the peer after `delay_ms` of extra suspension.
    Delivered {
        packet: Bytes,
        delay_ms: u64,
        corrupted: bool,
    },
    Dropped,
}

/// Run `packet` through the impairment pipeline.
pub fn transmit(packet: Bytes, params: &ChannelParams, source: &mut dyn RandomSource) -> Outcome {
    if source.draw() <= params.drop_probability {
        debug!("channel: packet dropped");
        return Outcome::Dropped;
    }

    let delay_ms = if source.draw() <= params.delay_probability {
        debug!("channel: delaying packet by {} ms", params.delay_ms);
        params.delay_ms
    } else {
        0
    };

    let mut corrupted = false;
    let packet = if source.draw() <= params.error_probability && packet.len() >= 2 {
        // The trailing CRC byte is left alone so the damage stays detectable.
        let mut damaged = packet.to_vec();
        let idx = damaged.len() - 2;
        damaged[idx] ^= CORRUPTION_MASK;
        corrupted = true;
        debug!("channel: flipped bit mask {CORRUPTION_MASK:#04x} in byte {idx}");
        Bytes::from(damaged)
    } else {
        packet
    };

    Outcome::Delivered {
        packet,
        delay_ms,
        corrupted,
    }
}

/// Channel parameters bound to a random source.
pub struct Channel {
    params: ChannelParams,
    source: Box<dyn RandomSource>,
}

impl Channel {
    pub fn new(params: ChannelParams, source: Box<dyn RandomSource>) -> Self {
        Self { params, source }
    }

    pub fn seeded(params: ChannelParams, seed: u64) -> Self {
        Self::new(params, Box::new(TenthsRng::seeded(seed)))
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Impair `packet`. The teardown sentinel always passes untouched so a
    /// session can end regardless of the configured loss.
    pub fn transmit(&mut self, packet: Bytes) -> Outcome {
        if is_teardown(&packet) {
            return Outcome::Delivered {
                packet,
                delay_ms: 0,
                corrupted: false,
            };
        }
        transmit(packet, &self.params, self.source.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_lab_abstract::packet::{TEARDOWN, encode_data, teardown};

    fn params(drop: f64, delay: f64, error: f64) -> ChannelParams {
        ChannelParams {
            drop_probability: drop,
            delay_probability: delay,
            error_probability: error,
            delay_ms: 40,
        }
    }

    #[test]
    fn draws_are_tenths() {
        let mut rng = TenthsRng::seeded(1);
        let mut seen = [false; 10];
        for _ in 0..1000 {
            let d = rng.draw();
            let bucket = (d * 10.0).round() as usize;
            assert!((1..=10).contains(&bucket));
            assert!((d - bucket as f64 / 10.0).abs() < f64::EPSILON);
            seen[bucket - 1] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn seeded_sources_repeat() {
        let mut a = TenthsRng::seeded(42);
        let mut b = TenthsRng::seeded(42);
        for _ in 0..50 {
            assert_eq!(a.draw(), b.draw());
        }
    }

    #[test]
    fn perfect_channel_passes_everything() {
        let mut channel = Channel::seeded(ChannelParams::perfect(), 9);
        for seq in 1..50u8 {
            let packet = encode_data(seq, b"x");
            assert_eq!(
                channel.transmit(packet.clone()),
                Outcome::Delivered {
                    packet,
                    delay_ms: 0,
                    corrupted: false
                }
            );
        }
    }

    #[test]
    fn drop_stops_the_pipeline() {
        let mut draws = ScriptedDraws::new([0.3]);
        let outcome = transmit(encode_data(1, b"a"), &params(0.3, 1.0, 1.0), &mut draws);
        assert_eq!(outcome, Outcome::Dropped);
        // Only the drop draw was consumed.
        assert_eq!(draws.draws.len(), 0);
    }

    #[test]
    fn boundary_draw_fires_stage() {
        let mut draws = ScriptedDraws::new([0.6, 0.5, 0.9]);
        let outcome = transmit(encode_data(1, b"a"), &params(0.5, 0.5, 0.5), &mut draws);
        assert!(matches!(
            outcome,
            Outcome::Delivered {
                delay_ms: 40,
                corrupted: false,
                ..
            }
        ));
    }

    #[test]
    fn corruption_flips_second_to_last_byte() {
        let packet = encode_data(2, b"l");
        let mut draws = ScriptedDraws::new([1.0, 1.0, 0.1]);
        let Outcome::Delivered {
            packet: damaged,
            corrupted,
            ..
        } = transmit(packet.clone(), &params(0.0, 0.0, 0.2), &mut draws)
        else {
            panic!("packet should be delivered");
        };
        assert!(corrupted);
        assert_eq!(damaged[0], packet[0]);
        assert_eq!(damaged[1], packet[1] ^ CORRUPTION_MASK);
        assert_eq!(damaged[2], packet[2]);
        assert_ne!(rdt_lab_abstract::crc8(&damaged), 0);
    }

    #[test]
    fn teardown_is_never_impaired() {
        let mut channel = Channel::new(params(1.0, 1.0, 1.0), Box::new(ScriptedDraws::default()));
        assert_eq!(
            channel.transmit(teardown()),
            Outcome::Delivered {
                packet: Bytes::from_static(&TEARDOWN),
                delay_ms: 0,
                corrupted: false
            }
        );
        assert_eq!(channel.transmit(encode_data(1, b"a")), Outcome::Dropped);
    }
}
