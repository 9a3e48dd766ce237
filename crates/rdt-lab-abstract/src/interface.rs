use bytes::Bytes;

/// What an event loop offers to a protocol engine. Engines never touch sockets
/// or clocks directly; the simulator and the live session both implement this.
pub trait SystemContext {
    /// Hand an encoded frame to the (unreliable) channel.
    fn send_packet(&mut self, packet: Bytes);

    /// Arm timer `timer_id` to fire after `delay_ms`. Re-arming an armed timer
    /// replaces its deadline.
    fn start_timer(&mut self, delay_ms: u64, timer_id: u32);

    fn cancel_timer(&mut self, timer_id: u32);

    /// Pass in-order application data to the upper layer.
    fn deliver_data(&mut self, data: &[u8]);

    fn log(&mut self, message: &str);

    /// Current time in milliseconds (simulated or since session start).
    fn now(&self) -> u64;

    /// Record a numeric sample (window base, in-flight count, ...) for reports.
    fn record_metric(&mut self, _name: &str, _value: f64) {}
}

/// A sender or receiver state machine.
pub trait TransportProtocol {
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// A datagram arrived from the peer. Teardown frames never reach here.
    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: &[u8]);

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32);

    /// The application wants `data` delivered reliably.
    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]);

    /// `true` once nothing is queued or awaiting acknowledgment. Receivers are
    /// always idle; a sender session tears down when its engine becomes idle.
    fn is_idle(&self) -> bool {
        true
    }
}
