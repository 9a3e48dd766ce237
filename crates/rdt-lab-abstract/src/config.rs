use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest window for which `2 × window` still fits the one-byte sequence field
/// with `0` reserved for teardown.
pub const MAX_WINDOW: u8 = 127;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("window size must be between 1 and 127, got {0}")]
    Window(u8),
    #[error("sequence space {space} is smaller than twice the window ({window})")]
    SequenceSpace { space: u8, window: u8 },
    #[error("unknown protocol version '{0}' (expected 1.0, 2.0, 2.1, 2.2, 3.0, gbn or sr)")]
    UnknownVersion(String),
}

/// Which protocol a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    Rdt10,
    Rdt20,
    Rdt21,
    Rdt22,
    #[default]
    Rdt30,
    Gbn,
    Sr,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 7] = [
        ProtocolVersion::Rdt10,
        ProtocolVersion::Rdt20,
        ProtocolVersion::Rdt21,
        ProtocolVersion::Rdt22,
        ProtocolVersion::Rdt30,
        ProtocolVersion::Gbn,
        ProtocolVersion::Sr,
    ];

    pub fn is_stop_and_wait(self) -> bool {
        !matches!(self, ProtocolVersion::Gbn | ProtocolVersion::Sr)
    }

    /// Whether data frames alternate a sequence bit.
    pub fn has_seq_bit(self) -> bool {
        matches!(
            self,
            ProtocolVersion::Rdt21 | ProtocolVersion::Rdt22 | ProtocolVersion::Rdt30
        )
    }

    pub fn has_feedback(self) -> bool {
        self != ProtocolVersion::Rdt10
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVersion::Rdt10 => "1.0",
            ProtocolVersion::Rdt20 => "2.0",
            ProtocolVersion::Rdt21 => "2.1",
            ProtocolVersion::Rdt22 => "2.2",
            ProtocolVersion::Rdt30 => "3.0",
            ProtocolVersion::Gbn => "gbn",
            ProtocolVersion::Sr => "sr",
        };
        f.write_str(name)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1.0" | "1" | "10" => Ok(ProtocolVersion::Rdt10),
            "2.0" | "20" => Ok(ProtocolVersion::Rdt20),
            "2.1" | "21" => Ok(ProtocolVersion::Rdt21),
            "2.2" | "22" => Ok(ProtocolVersion::Rdt22),
            "3.0" | "3" | "30" => Ok(ProtocolVersion::Rdt30),
            "gbn" | "go-back-n" => Ok(ProtocolVersion::Gbn),
            "sr" | "selective-repeat" => Ok(ProtocolVersion::Sr),
            _ => Err(ConfigError::UnknownVersion(s.to_string())),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.to_string()
    }
}

/// Impairments applied by the channel to every packet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParams {
    pub drop_probability: f64,
    pub delay_probability: f64,
    pub error_probability: f64,
    pub delay_ms: u64,
}

impl ChannelParams {
    pub fn perfect() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("drop probability", self.drop_probability),
            ("delay probability", self.delay_probability),
            ("error probability", self.error_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        Ok(())
    }
}

/// Everything a live session needs, loaded from TOML and/or CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub version: ProtocolVersion,
    pub channel: ChannelParams,
    pub window_size: u8,
    /// Size of the cyclic GBN/SR sequence space; defaults to `2 × window_size`.
    pub sequence_space: Option<u8>,
    pub timeout_ms: u64,
    pub max_tries: u32,
    pub poll_interval_ms: u64,
    pub host: String,
    pub port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::default(),
            channel: ChannelParams::default(),
            window_size: 5,
            sequence_space: None,
            timeout_ms: 2000,
            max_tries: 10,
            poll_interval_ms: 1,
            host: "127.0.0.1".to_string(),
            port: 6666,
        }
    }
}

impl SessionConfig {
    pub fn sequence_modulus(&self) -> u8 {
        self.sequence_space
            .unwrap_or_else(|| self.window_size.saturating_mul(2))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(ConfigError::Window(self.window_size));
        }
        let space = self.sequence_modulus();
        if u16::from(space) < 2 * u16::from(self.window_size) {
            return Err(ConfigError::SequenceSpace {
                space,
                window: self.window_size,
            });
        }
        Ok(())
    }
}

/// Discrete-event simulator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub channel: ChannelParams,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
    /// Sender timer expiries tolerated before the run is abandoned.
    pub max_tries: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            channel: ChannelParams::default(),
            min_latency: 10,
            max_latency: 100,
            seed: 0,
            max_tries: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_round_trip_through_strings() {
        for v in ProtocolVersion::ALL {
            assert_eq!(v.to_string().parse::<ProtocolVersion>(), Ok(v));
        }
        assert_eq!("GBN".parse::<ProtocolVersion>(), Ok(ProtocolVersion::Gbn));
        assert!(matches!(
            "4.0".parse::<ProtocolVersion>(),
            Err(ConfigError::UnknownVersion(_))
        ));
    }

    #[test]
    fn session_config_from_toml() {
        let cfg: SessionConfig = toml::from_str(
            r#"
            version = "sr"
            window_size = 4
            port = 7000

            [channel]
            drop_probability = 0.2
            delay_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.version, ProtocolVersion::Sr);
        assert_eq!(cfg.window_size, 4);
        assert_eq!(cfg.sequence_modulus(), 8);
        assert_eq!(cfg.channel.drop_probability, 0.2);
        assert_eq!(cfg.channel.error_probability, 0.0);
        assert_eq!(cfg.timeout_ms, 2000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = SessionConfig::default();
        cfg.channel.error_probability = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Probability { .. })
        ));

        let cfg = SessionConfig {
            window_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Window(0)));

        let cfg = SessionConfig {
            window_size: 5,
            sequence_space: Some(8),
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::SequenceSpace { space: 8, window: 5 })
        );
    }
}
