//! Go-Back-N: cumulative acknowledgments, a single retransmission timer and an
//! in-order-only receiver.

use std::collections::VecDeque;

use bytes::Bytes;
use rdt_lab_abstract::packet::{decode_ack, decode_data, encode_ack, encode_data};
use rdt_lab_abstract::{SystemContext, TransportProtocol};
use tracing::debug;

use crate::window::{SenderWindow, SeqSpace};

pub const GBN_TIMER: u32 = 0;

pub struct GbnSender {
    window: SenderWindow,
    /// Sent-but-unacknowledged packets, indexed by `seq - 1`.
    in_flight: Vec<Option<Bytes>>,
    pending: VecDeque<Bytes>,
    timeout_ms: u64,
}

impl GbnSender {
    pub fn new(window_size: u8, space: SeqSpace, timeout_ms: u64) -> Self {
        Self {
            window: SenderWindow::new(window_size, space),
            in_flight: vec![None; usize::from(space.modulus())],
            pending: VecDeque::new(),
            timeout_ms,
        }
    }

    pub fn window(&self) -> &SenderWindow {
        &self.window
    }

    fn slot(&self, seq: u8) -> usize {
        self.window.space().slot(seq, self.in_flight.len())
    }

    fn fill_window(&mut self, ctx: &mut dyn SystemContext) {
        while !self.pending.is_empty() && self.window.can_send() {
            let Some(seq) = self.window.reserve() else {
                break;
            };
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            let packet = encode_data(seq, &payload);
            let slot = self.slot(seq);
            self.in_flight[slot] = Some(packet.clone());

            ctx.log(&format!(
                "GBN send seq={seq} base={} next={}",
                self.window.base(),
                self.window.next_seq()
            ));
            ctx.send_packet(packet);

            if seq == self.window.base() {
                ctx.start_timer(self.timeout_ms, GBN_TIMER);
            }
        }
    }
}

impl TransportProtocol for GbnSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "GBN sender ready: window={} space={}",
            self.window.size(),
            self.window.space().modulus()
        ));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        let ack = match decode_ack(packet) {
            Ok(ack) if ack.crc_valid() => ack,
            Ok(_) => {
                ctx.log("GBN corrupted ACK ignored");
                return;
            }
            Err(err) => {
                ctx.log(&format!("GBN malformed ACK ignored: {err}"));
                return;
            }
        };

        if !self.window.is_outstanding(ack.seq) {
            ctx.log(&format!("GBN stale ACK {} ignored", ack.seq));
            return;
        }

        let space = self.window.space();
        let old_base = self.window.base();
        let released = self.window.advance_to(space.next(ack.seq));
        for i in 0..released {
            let slot = self.slot(space.add(old_base, i));
            self.in_flight[slot] = None;
        }
        ctx.log(&format!(
            "GBN ACK {} released {released}, base now {}",
            ack.seq,
            self.window.base()
        ));
        ctx.record_metric("in_flight", f64::from(self.window.in_flight()));

        if self.window.is_empty() {
            ctx.cancel_timer(GBN_TIMER);
        } else {
            ctx.start_timer(self.timeout_ms, GBN_TIMER);
        }
        self.fill_window(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id != GBN_TIMER || self.window.is_empty() {
            return;
        }
        ctx.log(&format!(
            "GBN timeout, resending {} packet(s) from {}",
            self.window.in_flight(),
            self.window.base()
        ));
        let outstanding: Vec<u8> = self.window.outstanding().collect();
        for seq in outstanding {
            if let Some(packet) = &self.in_flight[self.slot(seq)] {
                ctx.send_packet(packet.clone());
            }
        }
        ctx.start_timer(self.timeout_ms, GBN_TIMER);
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending.push_back(Bytes::copy_from_slice(data));
        self.fill_window(ctx);
    }

    fn is_idle(&self) -> bool {
        self.window.is_empty() && self.pending.is_empty()
    }
}

/// What the receiver made of one data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbnPacketStatus {
    Delivered,
    CrcNok,
    SeqNok,
}

pub struct GbnReceiver {
    space: SeqSpace,
    expected: u8,
    /// Last in-order sequence number, re-acknowledged on gaps.
    last_acked: Option<u8>,
}

impl GbnReceiver {
    pub fn new(space: SeqSpace) -> Self {
        Self {
            space,
            expected: space.first(),
            last_acked: None,
        }
    }

    pub fn expected_seq(&self) -> u8 {
        self.expected
    }

    pub fn handle(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) -> GbnPacketStatus {
        let decoded = match decode_data(frame) {
            Ok(decoded) if decoded.crc_valid() => decoded,
            _ => {
                ctx.log("GBN CRC mismatch, frame discarded");
                return GbnPacketStatus::CrcNok;
            }
        };

        if decoded.seq != self.expected {
            ctx.log(&format!(
                "GBN out of order: got {} expected {}",
                decoded.seq, self.expected
            ));
            if let Some(last) = self.last_acked {
                ctx.send_packet(encode_ack(last));
            }
            return GbnPacketStatus::SeqNok;
        }

        ctx.deliver_data(&decoded.payload);
        ctx.send_packet(encode_ack(decoded.seq));
        self.last_acked = Some(decoded.seq);
        self.expected = self.space.next(self.expected);
        debug!(expected = self.expected, "GBN delivered seq {}", decoded.seq);
        GbnPacketStatus::Delivered
    }
}

impl TransportProtocol for GbnReceiver {
    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        self.handle(ctx, packet);
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}
