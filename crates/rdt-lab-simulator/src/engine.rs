use crate::trace::SimulationReport;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rdt_lab_abstract::packet::{frame_seq, is_teardown};
use rdt_lab_abstract::{ProtocolVersion, SimConfig, SystemContext, TransportProtocol};
use rdt_lab_core::{Channel, Outcome};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    PacketArrival {
        to: NodeId,
        packet: Bytes,
    },
    TimerExpiry {
        node: NodeId,
        timer_id: u32,
        generation: u64,
    },
    AppSend {
        data: Bytes,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // tie-breaker for events at the same time
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (time, id)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// One line of the link timeline: sends, drops, corruptions, deliveries.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Actions buffered during one engine callback.
#[derive(Default)]
struct ActionBuffer {
    outgoing_packets: Vec<Bytes>,
    timers_start: Vec<(u64, u32)>, // (delay, id)
    timers_cancel: Vec<u32>,
    logs: Vec<String>,
    delivered_data: Vec<Vec<u8>>,
    metrics: Vec<(String, f64)>,
}

struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl SystemContext for ScopedContext<'_> {
    fn send_packet(&mut self, packet: Bytes) {
        self.buffer.outgoing_packets.push(packet);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.buffer.timers_start.push((delay_ms, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers_cancel.push(timer_id);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered_data.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    version: ProtocolVersion,
    channel: Channel,
    latency_rng: StdRng,

    pub sender: Box<dyn TransportProtocol>,
    pub receiver: Box<dyn TransportProtocol>,

    pub delivered_data: Vec<Vec<u8>>,
    pub sender_packet_count: u32,
    pub sender_timeouts: u32,
    pub retry_budget_exhausted: bool,

    /// Time series recorded via `SystemContext::record_metric`, keyed by name.
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    // Drop the first sender data frame carrying each listed seq.
    drop_sender_seq_once: Vec<u8>,
    // Drop the first receiver feedback frame carrying each listed seq.
    drop_receiver_ack_once: Vec<u8>,

    pub link_events: Vec<LinkEventSummary>,

    /// Bumped on every start and cancel; an expiry fires only if its
    /// generation is still current.
    timer_generations: HashMap<(NodeId, u32), u64>,

    /// Latest scheduled arrival per destination; links never reorder.
    last_arrival: HashMap<NodeId, u64>,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        version: ProtocolVersion,
        sender: Box<dyn TransportProtocol>,
        receiver: Box<dyn TransportProtocol>,
    ) -> Self {
        let channel = Channel::seeded(config.channel, config.seed);
        let latency_rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            version,
            channel,
            latency_rng,
            sender,
            receiver,
            delivered_data: Vec::new(),
            sender_packet_count: 0,
            sender_timeouts: 0,
            retry_budget_exhausted: false,
            metrics: HashMap::new(),
            drop_sender_seq_once: Vec::new(),
            drop_receiver_ack_once: Vec::new(),
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
            last_arrival: HashMap::new(),
        }
    }

    pub fn add_drop_sender_seq_once(&mut self, seq: u8) {
        self.drop_sender_seq_once.push(seq);
    }

    pub fn add_drop_receiver_ack_once(&mut self, ack: u8) {
        self.drop_receiver_ack_once.push(ack);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    /// All deliveries concatenated in order.
    pub fn delivered_stream(&self) -> Vec<u8> {
        self.delivered_data.concat()
    }

    /// Nothing left to send or acknowledge on the sender side.
    pub fn is_complete(&self) -> bool {
        self.sender.is_idle()
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_app_send(&mut self, time: u64, data: impl Into<Bytes>) {
        self.push_event(time, EventType::AppSend { data: data.into() });
    }

    /// Queue a whole message, split the way the protocol expects.
    pub fn schedule_message(&mut self, time: u64, message: &[u8]) {
        for segment in rdt_lab_core::segments(self.version, message) {
            self.schedule_app_send(time, segment);
        }
    }

    fn dispatch<F>(&mut self, node: NodeId, f: F)
    where
        F: FnOnce(&mut dyn TransportProtocol, &mut dyn SystemContext),
    {
        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            let engine = match node {
                NodeId::Sender => self.sender.as_mut(),
                NodeId::Receiver => self.receiver.as_mut(),
            };
            f(engine, &mut ctx);
        }
        self.process_actions(node, buffer);
    }

    pub fn init(&mut self) {
        self.dispatch(NodeId::Sender, |engine, ctx| engine.init(ctx));
        self.dispatch(NodeId::Receiver, |engine, ctx| engine.init(ctx));
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Process the next event. Returns false once the queue is empty or the
    /// sender has run out of retries.
    pub fn step(&mut self) -> bool {
        if self.retry_budget_exhausted {
            return false;
        }
        let Some(event) = self.event_queue.pop() else {
            return false;
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::PacketArrival { to, packet } => {
                self.dispatch(to, |engine, ctx| engine.on_packet(ctx, &packet));
            }
            EventType::TimerExpiry {
                node,
                timer_id,
                generation,
            } => {
                if self.timer_generations.get(&(node, timer_id)) != Some(&generation) {
                    debug!("Skipping stale timer event for timer_id={}", timer_id);
                    return true;
                }
                if node == NodeId::Sender {
                    self.sender_timeouts += 1;
                    if self.sender_timeouts > self.config.max_tries {
                        warn!(
                            "sender timed out {} times, giving up",
                            self.sender_timeouts
                        );
                        self.link_events.push(LinkEventSummary {
                            time: self.time,
                            description: format!(
                                "[Sender] retry budget of {} exhausted",
                                self.config.max_tries
                            ),
                        });
                        self.retry_budget_exhausted = true;
                        self.event_queue.clear();
                        return false;
                    }
                }
                self.dispatch(node, |engine, ctx| engine.on_timer(ctx, timer_id));
            }
            EventType::AppSend { data } => {
                self.dispatch(NodeId::Sender, |engine, ctx| engine.on_app_data(ctx, &data));
            }
        }
        true
    }

    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            protocol: self.version,
            duration_ms: self.time,
            delivered_data: self.delivered_data.clone(),
            sender_packet_count: self.sender_packet_count,
            sender_timeouts: self.sender_timeouts,
            retry_budget_exhausted: self.retry_budget_exhausted,
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    fn describe(&self, from: NodeId, packet: &[u8]) -> String {
        match frame_seq(self.version, from == NodeId::Sender, packet) {
            Some(seq) => format!("seq={seq} len={}", packet.len()),
            None => format!("len={}", packet.len()),
        }
    }

    /// Deterministic fault injection; returns true if `packet` was consumed.
    fn take_scripted_drop(&mut self, source: NodeId, packet: &[u8]) -> bool {
        let Some(seq) = frame_seq(self.version, source == NodeId::Sender, packet) else {
            return false;
        };
        let list = match source {
            NodeId::Sender => &mut self.drop_sender_seq_once,
            NodeId::Receiver => &mut self.drop_receiver_ack_once,
        };
        let Some(pos) = list.iter().position(|s| *s == seq) else {
            return false;
        };
        list.remove(pos);
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description: format!(
                "[{:?}->{:?}] DROP (scripted) seq={seq}",
                source,
                source.peer()
            ),
        });
        debug!("Deterministically dropping {:?} frame with seq={seq}", source);
        true
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(name)
                .or_default()
                .push((self.time, value));
        }

        for log in buffer.logs {
            info!("[{:?}] {}", source_node, log);
        }

        for data in buffer.delivered_data {
            info!("[{:?}] DELIVERED DATA: {} bytes", source_node, data.len());
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!(
                    "[{:?}] DELIVERED {} bytes to application",
                    source_node,
                    data.len()
                ),
            });
            self.delivered_data.push(data);
        }

        for timer_id in buffer.timers_cancel {
            *self
                .timer_generations
                .entry((source_node, timer_id))
                .or_insert(0) += 1;
        }

        for (delay, id) in buffer.timers_start {
            let generation = self.timer_generations.entry((source_node, id)).or_insert(0);
            *generation += 1;
            let generation = *generation;
            self.push_event(
                self.time + delay,
                EventType::TimerExpiry {
                    node: source_node,
                    timer_id: id,
                    generation,
                },
            );
        }

        for packet in buffer.outgoing_packets {
            // Teardown belongs to live sessions; a simulated run just ends.
            if is_teardown(&packet) {
                continue;
            }
            if source_node == NodeId::Sender {
                self.sender_packet_count += 1;
            }
            if self.take_scripted_drop(source_node, &packet) {
                continue;
            }

            let target_node = source_node.peer();
            let label = self.describe(source_node, &packet);
            let (packet, channel_delay) = match self.channel.transmit(packet) {
                Outcome::Dropped => {
                    self.link_events.push(LinkEventSummary {
                        time: self.time,
                        description: format!(
                            "[{:?}->{:?}] DROP (channel) {label}",
                            source_node, target_node
                        ),
                    });
                    continue;
                }
                Outcome::Delivered {
                    packet,
                    delay_ms,
                    corrupted,
                } => {
                    if corrupted {
                        self.link_events.push(LinkEventSummary {
                            time: self.time,
                            description: format!(
                                "[{:?}->{:?}] CORRUPT {label}",
                                source_node, target_node
                            ),
                        });
                    }
                    (packet, delay_ms)
                }
            };

            let latency = self
                .latency_rng
                .random_range(self.config.min_latency..=self.config.max_latency)
                + channel_delay;

            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!(
                    "[{:?}->{:?}] SEND {label} (latency={}ms)",
                    source_node, target_node, latency
                ),
            });

            let last = self.last_arrival.entry(target_node).or_insert(0);
            let arrival_time = (self.time + latency).max(*last);
            *last = arrival_time;

            self.push_event(
                arrival_time,
                EventType::PacketArrival {
                    to: target_node,
                    packet,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_lab_abstract::ChannelParams;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Arms timer 0, then cancels it from timer 1 before it can fire. Also
    /// re-arms timer 2 once so only the second deadline should count.
    struct TimerProbe {
        fired: Rc<Cell<u32>>,
        rearmed: bool,
    }

    impl TransportProtocol for TimerProbe {
        fn init(&mut self, ctx: &mut dyn SystemContext) {
            ctx.start_timer(10, 0);
            ctx.start_timer(5, 1);
            ctx.start_timer(3, 2);
        }

        fn on_packet(&mut self, _ctx: &mut dyn SystemContext, _packet: &[u8]) {}

        fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
            match timer_id {
                0 => self.fired.set(self.fired.get() + 100),
                1 => ctx.cancel_timer(0),
                2 if !self.rearmed => {
                    self.rearmed = true;
                    ctx.start_timer(20, 2);
                    ctx.start_timer(25, 2);
                }
                2 => self.fired.set(self.fired.get() + 1),
                _ => {}
            }
        }

        fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
    }

    fn probe() -> (Box<TimerProbe>, Rc<Cell<u32>>) {
        let fired = Rc::new(Cell::new(0));
        (
            Box::new(TimerProbe {
                fired: fired.clone(),
                rearmed: false,
            }),
            fired,
        )
    }

    #[test]
    fn cancelled_and_replaced_timers_do_not_fire() {
        let (sender, sender_fired) = probe();
        let (receiver, _) = probe();
        let mut sim = Simulator::new(
            SimConfig::default(),
            ProtocolVersion::Rdt30,
            sender,
            receiver,
        );
        sim.run_until_complete();

        assert_eq!(sender_fired.get(), 1);
        assert_eq!(sim.current_time(), 28);
        // Timer 1, the first timer 2 and the final timer 2 on the sender.
        assert_eq!(sim.sender_timeouts, 3);
    }

    struct Chatty;

    impl TransportProtocol for Chatty {
        fn init(&mut self, ctx: &mut dyn SystemContext) {
            ctx.start_timer(1, 0);
        }

        fn on_packet(&mut self, _ctx: &mut dyn SystemContext, _packet: &[u8]) {}

        fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
            ctx.start_timer(1, timer_id);
        }

        fn on_app_data(&mut self, _ctx: &mut dyn SystemContext, _data: &[u8]) {}
    }

    #[test]
    fn endless_timeouts_hit_the_retry_budget() {
        let config = SimConfig {
            max_tries: 4,
            ..Default::default()
        };
        let mut sim = Simulator::new(config, ProtocolVersion::Rdt30, Box::new(Chatty), Box::new(Chatty));
        sim.run_until_complete();
        assert!(sim.retry_budget_exhausted);
        assert_eq!(sim.sender_timeouts, 5);
        assert!(sim.export_report().retry_budget_exhausted);
    }

    #[test]
    fn channel_delay_adds_to_latency() {
        let config = SimConfig {
            channel: ChannelParams {
                delay_probability: 1.0,
                delay_ms: 500,
                ..Default::default()
            },
            min_latency: 10,
            max_latency: 10,
            ..Default::default()
        };
        let session = rdt_lab_abstract::SessionConfig {
            version: ProtocolVersion::Rdt10,
            ..Default::default()
        };
        let mut sim = Simulator::new(
            config,
            ProtocolVersion::Rdt10,
            rdt_lab_core::sender_for(&session),
            rdt_lab_core::receiver_for(&session),
        );
        sim.schedule_app_send(0, Bytes::from_static(b"late"));
        sim.run_until_complete();
        assert_eq!(sim.delivered_stream(), b"late");
        assert_eq!(sim.current_time(), 510);
    }
}
