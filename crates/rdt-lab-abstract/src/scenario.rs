use crate::config::{ProtocolVersion, SimConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    /// Builtin engine pair to run when the caller does not supply one.
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default = "default_window")]
    pub window_size: u8,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub config: SimConfigOverride,
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

fn default_window() -> u8 {
    5
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub drop_probability: Option<f64>,
    pub delay_probability: Option<f64>,
    pub error_probability: Option<f64>,
    pub delay_ms: Option<u64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
    pub max_tries: Option<u32>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.drop_probability {
            config.channel.drop_probability = v;
        }
        if let Some(v) = self.delay_probability {
            config.channel.delay_probability = v;
        }
        if let Some(v) = self.error_probability {
            config.channel.error_probability = v;
        }
        if let Some(v) = self.delay_ms {
            config.channel.delay_ms = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.max_tries {
            config.max_tries = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Application sends data at a specific time
    AppSend { time: u64, data: String },
    /// Deterministically drop the first packet sent by Sender with given seq number
    DropNextFromSenderSeq { seq: u8 },
    /// Deterministically drop the first ACK sent by Receiver with given seq number
    DropNextFromReceiverAck { ack: u8 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// A single delivery to the application equals `data`
    DataDelivered { data: String },
    /// All deliveries concatenated equal `data`
    DeliveredStream { data: String },
    /// Total number of packets sent by Sender is within range
    SenderPacketCount { min: u32, max: Option<u32> },
    /// Sender timer expiries do not exceed `max`
    MaxSenderTimeouts { max: u32 },
    /// Simulation finishes within time
    MaxDuration { ms: u64 },
}
