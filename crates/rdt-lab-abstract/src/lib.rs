pub mod config;
pub mod crc;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use interface::{SystemContext, TransportProtocol};
pub use packet::{Decoded, Feedback, FeedbackKind, PacketError};

pub use config::{ChannelParams, ConfigError, ProtocolVersion, SessionConfig, SimConfig};
pub use crc::{CrcOutcome, crc8};
pub use scenario::{SimConfigOverride, TestAction, TestAssertion, TestScenario};
