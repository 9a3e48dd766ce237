//! The live event loop: one engine, one transport, one impaired channel.
//!
//! Each iteration fires expired timers, then waits at most one poll interval
//! for a datagram. The loop is single-threaded; engines are called
//! synchronously and their actions are flushed before the next wait.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rdt_lab_abstract::packet::{is_teardown, teardown};
use rdt_lab_abstract::{SessionConfig, SystemContext, TransportProtocol};
use rdt_lab_core::{Channel, Outcome, Role, SessionError, TenthsRng, engine_for, segments};
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// Timer deadlines and the retry counter of a running session.
#[derive(Debug)]
pub struct SessionState {
    started: Instant,
    deadlines: HashMap<u32, Instant>,
    pub tries: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            deadlines: HashMap::new(),
            tries: 0,
        }
    }

    pub fn arm(&mut self, timer_id: u32, delay: Duration) {
        self.deadlines.insert(timer_id, Instant::now() + delay);
    }

    pub fn disarm(&mut self, timer_id: u32) {
        self.deadlines.remove(&timer_id);
    }

    pub fn is_armed(&self, timer_id: u32) -> bool {
        self.deadlines.contains_key(&timer_id)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<u32> {
        let mut due: Vec<(Instant, u32)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub delivered: Vec<u8>,
    /// Frames this end handed to the channel, teardown excluded.
    pub packets_sent: u32,
    pub retransmit_timeouts: u32,
}

struct LiveContext<'a> {
    role: Role,
    state: &'a mut SessionState,
    delivered: &'a mut Vec<u8>,
    outbound: Vec<Bytes>,
}

impl SystemContext for LiveContext<'_> {
    fn send_packet(&mut self, packet: Bytes) {
        self.outbound.push(packet);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.state.arm(timer_id, Duration::from_millis(delay_ms));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.state.disarm(timer_id);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.delivered.extend_from_slice(data);
    }

    fn log(&mut self, message: &str) {
        debug!(role = ?self.role, "{message}");
    }

    fn now(&self) -> u64 {
        self.state.elapsed_ms()
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        debug!(role = ?self.role, metric = name, value);
    }
}

pub struct Session<T: Transport> {
    role: Role,
    config: SessionConfig,
    engine: Box<dyn TransportProtocol>,
    channel: Channel,
    transport: T,
    state: SessionState,
    delivered: Vec<u8>,
    packets_sent: u32,
}

impl<T: Transport> Session<T> {
    pub fn new(role: Role, config: SessionConfig, transport: T) -> Result<Self, SessionError> {
        let engine = engine_for(role, &config)?;
        let channel = Channel::new(config.channel, Box::new(TenthsRng::from_os_rng()));
        Ok(Self {
            role,
            config,
            engine,
            channel,
            transport,
            state: SessionState::new(),
            delivered: Vec::new(),
            packets_sent: 0,
        })
    }

    /// Replace the channel, e.g. with a seeded one for reproducible runs.
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    fn call<F>(&mut self, f: F) -> Vec<Bytes>
    where
        F: FnOnce(&mut dyn TransportProtocol, &mut dyn SystemContext),
    {
        let mut ctx = LiveContext {
            role: self.role,
            state: &mut self.state,
            delivered: &mut self.delivered,
            outbound: Vec::new(),
        };
        f(self.engine.as_mut(), &mut ctx);
        ctx.outbound
    }

    async fn flush(&mut self, outbound: Vec<Bytes>) -> Result<(), SessionError> {
        for packet in outbound {
            if !is_teardown(&packet) {
                self.packets_sent += 1;
            }
            match self.channel.transmit(packet) {
                Outcome::Dropped => {
                    debug!(role = ?self.role, "frame lost in channel");
                }
                Outcome::Delivered {
                    packet,
                    delay_ms,
                    corrupted,
                } => {
                    if corrupted {
                        debug!(role = ?self.role, "frame corrupted in channel");
                    }
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    self.transport.send(&packet).await?;
                }
            }
        }
        Ok(())
    }

    async fn fire_timers(&mut self) -> Result<(), SessionError> {
        for timer_id in self.state.take_expired(Instant::now()) {
            self.state.tries += 1;
            if self.state.tries > self.config.max_tries {
                warn!(role = ?self.role, tries = self.state.tries, "retry budget exhausted");
                return Err(SessionError::RetryBudgetExhausted {
                    tries: self.state.tries,
                });
            }
            debug!(role = ?self.role, timer_id, tries = self.state.tries, "timer expired");
            let out = self.call(|engine, ctx| engine.on_timer(ctx, timer_id));
            self.flush(out).await?;
        }
        Ok(())
    }

    fn summary(self) -> SessionSummary {
        SessionSummary {
            delivered: self.delivered,
            packets_sent: self.packets_sent,
            retransmit_timeouts: self.state.tries,
        }
    }

    /// Deliver `message` reliably, then send the teardown sentinel.
    pub async fn run_sender(mut self, message: &[u8]) -> Result<SessionSummary, SessionError> {
        info!(
            version = %self.config.version,
            bytes = message.len(),
            "sender session starting"
        );
        let out = self.call(|engine, ctx| engine.init(ctx));
        self.flush(out).await?;

        for segment in segments(self.config.version, message) {
            let out = self.call(|engine, ctx| engine.on_app_data(ctx, &segment));
            self.flush(out).await?;
        }

        while !self.engine.is_idle() {
            self.fire_timers().await?;
            let wait = self.poll_interval();
            match self.transport.receive(wait).await? {
                Some(frame) if is_teardown(&frame) => {
                    warn!("peer sent teardown before the transfer completed");
                    break;
                }
                Some(frame) => {
                    let out = self.call(|engine, ctx| engine.on_packet(ctx, &frame));
                    self.flush(out).await?;
                }
                None => {}
            }
        }

        self.flush(vec![teardown()]).await?;
        info!(
            packets = self.packets_sent,
            timeouts = self.state.tries,
            "transfer complete, teardown sent"
        );
        Ok(self.summary())
    }

    /// Receive until the peer tears the session down.
    pub async fn run_receiver(mut self) -> Result<SessionSummary, SessionError> {
        info!(version = %self.config.version, "receiver session waiting for data");
        let out = self.call(|engine, ctx| engine.init(ctx));
        self.flush(out).await?;

        loop {
            self.fire_timers().await?;
            let wait = self.poll_interval();
            let Some(frame) = self.transport.receive(wait).await? else {
                continue;
            };
            if is_teardown(&frame) {
                info!(bytes = self.delivered.len(), "teardown received");
                break;
            }
            let out = self.call(|engine, ctx| engine.on_packet(ctx, &frame));
            self.flush(out).await?;
        }
        Ok(self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_timers_come_out_earliest_first() {
        let mut state = SessionState::new();
        state.arm(3, Duration::from_millis(20));
        state.arm(1, Duration::from_millis(10));
        state.arm(7, Duration::from_secs(60));

        let later = Instant::now() + Duration::from_millis(30);
        assert_eq!(state.take_expired(later), vec![1, 3]);
        assert!(state.is_armed(7));
        assert!(!state.is_armed(1));
        assert!(state.take_expired(later).is_empty());
    }

    #[test]
    fn rearming_replaces_the_deadline() {
        let mut state = SessionState::new();
        state.arm(0, Duration::from_millis(0));
        state.arm(0, Duration::from_secs(60));
        assert!(state.take_expired(Instant::now()).is_empty());
        state.disarm(0);
        assert!(!state.is_armed(0));
    }
}
