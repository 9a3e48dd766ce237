use rdt_lab_abstract::{ProtocolVersion, SimConfig};
use serde::Serialize;
use std::collections::HashMap;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub protocol: ProtocolVersion,
    pub duration_ms: u64,
    pub delivered_data: Vec<Vec<u8>>,
    pub sender_packet_count: u32,
    pub sender_timeouts: u32,
    pub retry_budget_exhausted: bool,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    pub fn delivered_stream(&self) -> Vec<u8> {
        self.delivered_data.concat()
    }
}
