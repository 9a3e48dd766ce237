//! Selective Repeat: every packet has its own timer and acknowledgment, and
//! the receiver buffers out-of-order arrivals that fall inside its window.
//!
//! Timer ids are the sequence numbers themselves.

use std::collections::VecDeque;

use bytes::Bytes;
use rdt_lab_abstract::packet::{decode_ack, decode_data, encode_ack, encode_data};
use rdt_lab_abstract::{SystemContext, TransportProtocol};
use tracing::debug;

use crate::window::{SenderWindow, SeqSpace};

#[derive(Debug, Clone, Default)]
struct SendSlot {
    packet: Option<Bytes>,
    acked: bool,
}

pub struct SrSender {
    window: SenderWindow,
    slots: Vec<SendSlot>,
    pending: VecDeque<Bytes>,
    timeout_ms: u64,
}

impl SrSender {
    pub fn new(window_size: u8, space: SeqSpace, timeout_ms: u64) -> Self {
        Self {
            window: SenderWindow::new(window_size, space),
            slots: vec![SendSlot::default(); usize::from(space.modulus())],
            pending: VecDeque::new(),
            timeout_ms,
        }
    }

    pub fn window(&self) -> &SenderWindow {
        &self.window
    }

    fn slot_mut(&mut self, seq: u8) -> &mut SendSlot {
        let idx = self.window.space().slot(seq, self.slots.len());
        &mut self.slots[idx]
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
            *self.slot_mut(seq) = SendSlot {
                packet: Some(packet.clone()),
                acked: false,
            };
            ctx.log(&format!("SR send seq={seq}"));
            ctx.send_packet(packet);
            ctx.start_timer(self.timeout_ms, u32::from(seq));
        }
    }

    /// Slide `base` past the run of acknowledged slots at the front.
    fn advance_base(&mut self) -> u8 {
        let mut released = 0;
        while !self.window.is_empty() {
            let base = self.window.base();
            let slot = self.slot_mut(base);
            if !slot.acked {
                break;
            }
            *slot = SendSlot::default();
            self.window.advance_to(self.window.space().next(base));
            released += 1;
        }
        released
    }
}

impl TransportProtocol for SrSender {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        ctx.log(&format!(
            "SR sender ready: window={} space={}",
            self.window.size(),
            self.window.space().modulus()
        ));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        let ack = match decode_ack(packet) {
            Ok(ack) if ack.crc_valid() => ack,
            Ok(_) => {
                ctx.log("SR corrupted ACK ignored");
                return;
            }
            Err(err) => {
                ctx.log(&format!("SR malformed ACK ignored: {err}"));
                return;
            }
        };

        if !self.window.is_outstanding(ack.seq) {
            ctx.log(&format!("SR ACK {} outside window ignored", ack.seq));
            return;
        }
        let slot = self.slot_mut(ack.seq);
        if slot.acked {
            return;
        }
        slot.acked = true;
        ctx.cancel_timer(u32::from(ack.seq));

        if ack.seq == self.window.base() {
            let released = self.advance_base();
            ctx.log(&format!(
                "SR ACK {} released {released}, base now {}",
                ack.seq,
                self.window.base()
            ));
            ctx.record_metric("in_flight", f64::from(self.window.in_flight()));
            self.fill_window(ctx);
        } else {
            ctx.log(&format!("SR ACK {} marked", ack.seq));
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        let Ok(seq) = u8::try_from(timer_id) else {
            return;
        };
        if !self.window.is_outstanding(seq) {
            return;
        }
        let timeout_ms = self.timeout_ms;
        let slot = self.slot_mut(seq);
        if slot.acked {
            return;
        }
        if let Some(packet) = slot.packet.clone() {
            ctx.log(&format!("SR timeout, resending seq {seq}"));
            ctx.send_packet(packet);
            ctx.start_timer(timeout_ms, timer_id);
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending.push_back(Bytes::copy_from_slice(data));
        self.fill_window(ctx);
    }

    fn is_idle(&self) -> bool {
        self.window.is_empty() && self.pending.is_empty()
    }
}

/// What the receiver did with one data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrAckKind {
    Buffered,
    Duplicate,
    Ignored,
    CrcNok,
}

/// Out-of-order storage, one slot per sequence number.
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    pub received: Vec<bool>,
    pub data: Vec<Bytes>,
    space: SeqSpace,
}

impl ReceiveBuffer {
    pub fn new(space: SeqSpace) -> Self {
        let len = usize::from(space.modulus());
        Self {
            received: vec![false; len],
            data: vec![Bytes::new(); len],
            space,
        }
    }

    fn slot(&self, seq: u8) -> usize {
        self.space.slot(seq, self.received.len())
    }

    pub fn is_held(&self, seq: u8) -> bool {
        self.received[self.slot(seq)]
    }

    pub fn store(&mut self, seq: u8, payload: Bytes) {
        let slot = self.slot(seq);
        self.received[slot] = true;
        self.data[slot] = payload;
    }

    fn take(&mut self, seq: u8) -> Option<Bytes> {
        let slot = self.slot(seq);
        if !self.received[slot] {
            return None;
        }
        self.received[slot] = false;
        Some(std::mem::take(&mut self.data[slot]))
    }
}

/// Deliver the contiguous run starting at `base` and return the new base.
pub fn deliver_data(ctx: &mut dyn SystemContext, buffer: &mut ReceiveBuffer, base: u8) -> u8 {
    let mut base = base;
    while let Some(payload) = buffer.take(base) {
        ctx.deliver_data(&payload);
        base = buffer.space.next(base);
    }
    base
}

pub struct SrReceiver {
    space: SeqSpace,
    window_size: u8,
    receive_base: u8,
    buffer: ReceiveBuffer,
}

impl SrReceiver {
    pub fn new(window_size: u8, space: SeqSpace) -> Self {
        Self {
            space,
            window_size,
            receive_base: space.first(),
            buffer: ReceiveBuffer::new(space),
        }
    }

    pub fn receive_base(&self) -> u8 {
        self.receive_base
    }

    pub fn handle(&mut self, ctx: &mut dyn SystemContext, frame: &[u8]) -> SrAckKind {
        let decoded = match decode_data(frame) {
            Ok(decoded) if decoded.crc_valid() => decoded,
            _ => {
                ctx.log("SR CRC mismatch, frame discarded");
                return SrAckKind::CrcNok;
            }
        };
        let seq = decoded.seq;
        let rb = self.receive_base;
        let w = self.window_size;

        if self.space.in_range(rb, w, seq) {
            ctx.send_packet(encode_ack(seq));
            if self.buffer.is_held(seq) {
                return SrAckKind::Duplicate;
            }
            self.buffer.store(seq, decoded.payload);
            if seq == rb {
                self.receive_base = deliver_data(ctx, &mut self.buffer, rb);
                debug!(base = self.receive_base, "SR delivered run from {rb}");
            }
            SrAckKind::Buffered
        } else if self
            .space
            .in_range(self.space.add(rb, self.space.modulus() - w), w, seq)
        {
            ctx.log(&format!("SR old seq {seq} re-acknowledged"));
            ctx.send_packet(encode_ack(seq));
            SrAckKind::Duplicate
        } else {
            ctx.log(&format!("SR seq {seq} outside both windows ignored"));
            SrAckKind::Ignored
        }
    }
}

impl TransportProtocol for SrReceiver {
    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]) {
        self.handle(ctx, packet);
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingContext;

    #[test]
    fn gap_fill_delivers_run_in_one_call() {
        let mut ctx = RecordingContext::default();
        let mut receiver = SrReceiver::new(5, SeqSpace::new(10));

        assert_eq!(receiver.handle(&mut ctx, &encode_data(1, b"1")), SrAckKind::Buffered);
        assert_eq!(receiver.handle(&mut ctx, &encode_data(3, b"3")), SrAckKind::Buffered);
        assert_eq!(ctx.delivered, b"1");
        assert_eq!(receiver.receive_base(), 2);

        assert_eq!(receiver.handle(&mut ctx, &encode_data(2, b"2")), SrAckKind::Buffered);
        assert_eq!(ctx.delivered, b"123");
        assert_eq!(receiver.receive_base(), 4);
        assert_eq!(
            ctx.take_sent(),
            vec![encode_ack(1), encode_ack(3), encode_ack(2)]
        );
    }

    #[test]
    fn receiver_classifies_frames() {
        let mut ctx = RecordingContext::default();
        let mut receiver = SrReceiver::new(3, SeqSpace::new(6));
        receiver.handle(&mut ctx, &encode_data(2, b"b"));
        assert_eq!(receiver.handle(&mut ctx, &encode_data(2, b"b")), SrAckKind::Duplicate);
        receiver.handle(&mut ctx, &encode_data(1, b"a"));
        ctx.take_sent();

        // Base is 3: seq 1 falls in the previous window and is re-acked.
        assert_eq!(receiver.handle(&mut ctx, &encode_data(1, b"a")), SrAckKind::Duplicate);
        assert_eq!(ctx.take_sent(), vec![encode_ack(1)]);
        // The previous window is [6, 3), so seq 6 is old as well.
        assert_eq!(receiver.handle(&mut ctx, &encode_data(6, b"f")), SrAckKind::Duplicate);
        ctx.take_sent();

        let mut damaged = encode_data(3, b"c").to_vec();
        damaged[1] ^= 0x02;
        assert_eq!(receiver.handle(&mut ctx, &damaged), SrAckKind::CrcNok);
        assert!(ctx.sent.is_empty());
        assert_eq!(ctx.delivered, b"ab");
    }

    #[test]
    fn frames_far_outside_window_are_ignored() {
        let mut ctx = RecordingContext::default();
        let mut receiver = SrReceiver::new(2, SeqSpace::new(6));
        // Window [1, 3), previous window [5, 1): seq 3 and 4 are neither.
        assert_eq!(receiver.handle(&mut ctx, &encode_data(3, b"x")), SrAckKind::Ignored);
        assert_eq!(receiver.handle(&mut ctx, &encode_data(4, b"x")), SrAckKind::Ignored);
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn deliver_data_stops_at_first_hole() {
        let mut ctx = RecordingContext::default();
        let space = SeqSpace::new(8);
        let mut buffer = ReceiveBuffer::new(space);
        buffer.store(8, Bytes::from_static(b"h"));
        buffer.store(1, Bytes::from_static(b"a"));
        buffer.store(3, Bytes::from_static(b"c"));

        assert_eq!(deliver_data(&mut ctx, &mut buffer, 8), 2);
        assert_eq!(ctx.delivered, b"ha");
        assert!(buffer.is_held(3));
        assert!(!buffer.is_held(1));
    }

    #[test]
    fn only_the_lost_packet_is_retransmitted() {
        let mut tx = RecordingContext::default();
        let mut rx = RecordingContext::default();
        let space = SeqSpace::new(10);
        let mut sender = SrSender::new(5, space, 500);
        let mut receiver = SrReceiver::new(5, space);

        for byte in b"abcde" {
            sender.on_app_data(&mut tx, &[*byte]);
        }
        let first = tx.take_sent();
        assert_eq!(first.len(), 5);
        assert_eq!(tx.timer_starts, 5);

        for (i, frame) in first.iter().enumerate() {
            if i != 1 {
                receiver.handle(&mut rx, frame);
            }
        }
        for ack in rx.take_sent() {
            sender.on_packet(&mut tx, &ack);
        }
        assert_eq!(sender.window().base(), 2);
        assert!(tx.is_armed(2));
        assert!(!tx.is_armed(3));

        sender.on_timer(&mut tx, 2);
        let resent = tx.take_sent();
        assert_eq!(resent, vec![first[1].clone()]);

        receiver.handle(&mut rx, &resent[0]);
        for ack in rx.take_sent() {
            sender.on_packet(&mut tx, &ack);
        }
        assert!(sender.is_idle());
        assert!(tx.timers.is_empty());
        assert_eq!(rx.delivered, b"abcde");
        // Five originals plus one retransmission.
        assert_eq!(first.len() + resent.len(), 6);
    }

    #[test]
    fn timer_for_acked_packet_does_nothing() {
        let mut ctx = RecordingContext::default();
        let mut sender = SrSender::new(3, SeqSpace::new(6), 500);
        sender.on_app_data(&mut ctx, b"a");
        sender.on_app_data(&mut ctx, b"b");
        ctx.take_sent();
        sender.on_packet(&mut ctx, &encode_ack(2));
        sender.on_timer(&mut ctx, 2);
        assert!(ctx.sent.is_empty());
        assert_eq!(sender.window().base(), 1);
    }
}
