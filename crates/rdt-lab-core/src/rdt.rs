//! Stop-and-wait engines for RDT 1.0 through 3.0.
//!
//! One packet is outstanding at a time. The versions differ only in what the
//! receiver sends back and what the sender makes of it:
//!
//! | Version | Feedback            | Data seq bit | Duplicate suppression |
//! |---------|---------------------|--------------|-----------------------|
//! | 1.0     | none                | no           | no                    |
//! | 2.0     | `ACK` / `NAK`       | no           | no                    |
//! | 2.1     | `ACK` / `NAK`       | yes          | yes                   |
//! | 2.2     | `<seq>ACK` / `NAK`  | yes          | yes                   |
//! | 3.0     | `<seq>ACK` / `NAK`  | yes          | yes, plus timer-only recovery |

use std::collections::VecDeque;

use bytes::Bytes;
use rdt_lab_abstract::packet::{FeedbackKind, decode_data, decode_feedback, encode_data, encode_feedback};
use rdt_lab_abstract::{Feedback, ProtocolVersion, SystemContext, TransportProtocol};

pub const DATA_TIMER: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    WaitForAppData,
    WaitForAck,
}

pub struct StopAndWaitSender {
    version: ProtocolVersion,
    timeout_ms: u64,
    state: SenderState,
    seq: u8,
    pending: VecDeque<Bytes>,
    last_packet: Option<Bytes>,
}

impl StopAndWaitSender {
    pub fn new(version: ProtocolVersion, timeout_ms: u64) -> Self {
        debug_assert!(version.is_stop_and_wait());
        Self {
            version,
            timeout_ms,
            state: SenderState::WaitForAppData,
            seq: 0,
            pending: VecDeque::new(),
            last_packet: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    fn try_send(&mut self, ctx: &mut dyn SystemContext) {
        while self.state == SenderState::WaitForAppData {
            let Some(payload) = self.pending.pop_front() else {
                return;
            };
            let packet = encode_data(self.seq, &payload);
            ctx.log(&format!(
                "RDT{} send seq={} ({} bytes)",
                self.version,
                self.seq,
                payload.len()
            ));
            ctx.send_packet(packet.clone());

            // 1.0 trusts the channel: no feedback, no timer, next packet at once.
            if self.version.has_feedback() {
                ctx.start_timer(self.timeout_ms, DATA_TIMER);
                self.last_packet = Some(packet);
                self.state = SenderState::WaitForAck;
            }
        }
    }

    fn retransmit(&mut self, ctx: &mut dyn SystemContext, reason: &str) {
        if let Some(packet) = &self.last_packet {
            ctx.log(&format!("RDT{} {reason}, resending seq {}", self.version, self.seq));
            ctx.send_packet(packet.clone());
            ctx.start_timer(self.timeout_ms, DATA_TIMER);
        }
    }

    fn complete(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!("RDT{} ACK for seq {}", self.version, self.seq));
        ctx.cancel_timer(DATA_TIMER);
        if self.version.has_seq_bit() {
            self.seq ^= 1;
        }
        self.last_packet = None;
        self.state = SenderState::WaitForAppData;
        self.try_send(ctx);
    }
}

impl TransportProtocol for StopAndWaitSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!("RDT{} sender ready", self.version));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        if self.state != SenderState::WaitForAck {
            return;
        }
        match decode_feedback(self.version, packet) {
            None => ctx.log(&format!(
                "RDT{} damaged feedback ignored, waiting for timeout",
                self.version
            )),
            Some(Feedback {
                kind: FeedbackKind::Nak,
                ..
            }) => self.retransmit(ctx, "NAK received"),
            Some(Feedback {
                kind: FeedbackKind::Ack,
                seq,
            }) => match seq {
                None => self.complete(ctx),
                Some(seq) if seq == self.seq => self.complete(ctx),
                Some(seq) if self.version == ProtocolVersion::Rdt22 => {
                    self.retransmit(ctx, &format!("duplicate ACK {seq}"))
                }
                Some(seq) => ctx.log(&format!(
                    "RDT{} stale ACK {seq} ignored, waiting for timeout",
                    self.version
                )),
            },
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id == DATA_TIMER && self.state == SenderState::WaitForAck {
            self.retransmit(ctx, "timeout");
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending.push_back(Bytes::copy_from_slice(data));
        self.try_send(ctx);
    }

    fn is_idle(&self) -> bool {
        self.state == SenderState::WaitForAppData && self.pending.is_empty()
    }
}

/// Per-connection receiver context: the sequence number of the packet being
/// processed and the last one delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdtVariables {
    pub version: ProtocolVersion,
    pub seq: u8,
    pub last_seq: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdtReceiveStatus {
    Delivered,
    Duplicate,
    Corrupted,
}

pub struct StopAndWaitReceiver {
    vars: RdtVariables,
    /// Next sequence bit expected by 2.1.
    expected: u8,
}

impl StopAndWaitReceiver {
    pub fn new(version: ProtocolVersion) -> Self {
        debug_assert!(version.is_stop_and_wait());
        Self {
            vars: RdtVariables {
                version,
                seq: 0,
                last_seq: None,
            },
            expected: 0,
        }
    }

    pub fn vars(&self) -> &RdtVariables {
        &self.vars
    }

    fn reply(&self, ctx: &mut dyn SystemContext, kind: FeedbackKind, seq: u8) {
        if let Some(frame) = encode_feedback(self.vars.version, kind, seq) {
            ctx.send_packet(frame);
        }
    }

    /// Process one data frame, replying and delivering through `ctx`.
    pub fn handle(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) -> RdtReceiveStatus {
        let version = self.vars.version;
        let decoded = match decode_data(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                ctx.log(&format!("RDT{version} unreadable frame: {err}"));
                self.reply(ctx, FeedbackKind::Nak, self.expected);
                return RdtReceiveStatus::Corrupted;
            }
        };

        if version == ProtocolVersion::Rdt10 {
            ctx.deliver_data(&decoded.payload);
            return RdtReceiveStatus::Delivered;
        }

        if !decoded.crc_valid() {
            ctx.log(&format!("RDT{version} CRC mismatch, sending NAK"));
            self.reply(ctx, FeedbackKind::Nak, self.expected);
            return RdtReceiveStatus::Corrupted;
        }

        match version {
            ProtocolVersion::Rdt20 => {
                ctx.deliver_data(&decoded.payload);
                self.reply(ctx, FeedbackKind::Ack, 0);
                RdtReceiveStatus::Delivered
            }
            ProtocolVersion::Rdt21 => {
                if decoded.seq == self.expected {
                    ctx.deliver_data(&decoded.payload);
                    self.reply(ctx, FeedbackKind::Ack, decoded.seq);
                    self.vars.last_seq = Some(decoded.seq);
                    self.expected ^= 1;
                    RdtReceiveStatus::Delivered
                } else {
                    ctx.log(&format!("RDT{version} duplicate seq {}", decoded.seq));
                    self.reply(ctx, FeedbackKind::Ack, decoded.seq);
                    RdtReceiveStatus::Duplicate
                }
            }
            _ => {
                self.vars.seq = decoded.seq;
                if self.vars.last_seq == Some(self.vars.seq) {
                    ctx.log(&format!(
                        "RDT{version} duplicate seq {}, re-sending last ACK",
                        self.vars.seq
                    ));
                    self.reply(ctx, FeedbackKind::Ack, self.vars.seq);
                    RdtReceiveStatus::Duplicate
                } else {
                    ctx.deliver_data(&decoded.payload);
                    self.reply(ctx, FeedbackKind::Ack, self.vars.seq);
                    self.vars.last_seq = Some(self.vars.seq);
                    self.expected = self.vars.seq ^ 1;
                    RdtReceiveStatus::Delivered
                }
            }
        }
    }
}

impl TransportProtocol for StopAndWaitReceiver {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!("RDT{} receiver ready", self.vars.version));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        self.handle(ctx, packet);
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}
