use std::collections::BTreeMap;

use bytes::Bytes;
use rdt_lab_abstract::SystemContext;

/// Captures everything an engine asks of its event loop.
#[derive(Default)]
pub struct RecordingContext {
    pub sent: Vec<Bytes>,
    pub delivered: Vec<u8>,
    /// Armed timers: id -> delay of the most recent start.
    pub timers: BTreeMap<u32, u64>,
    pub timer_starts: u32,
    pub logs: Vec<String>,
    pub now: u64,
}

impl RecordingContext {
    pub fn take_sent(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.sent)
    }

    pub fn is_armed(&self, timer_id: u32) -> bool {
        self.timers.contains_key(&timer_id)
    }
}

impl SystemContext for RecordingContext {
    fn send_packet(&mut self, packet: Bytes) {
        self.sent.push(packet);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.timers.insert(timer_id, delay_ms);
        self.timer_starts += 1;
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.timers.remove(&timer_id);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.delivered.extend_from_slice(data);
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }
}
