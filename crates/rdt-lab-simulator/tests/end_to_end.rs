use rdt_lab_abstract::{ChannelParams, ProtocolVersion, SessionConfig, SimConfig};
use rdt_lab_core::{receiver_for, segments, sender_for};
use rdt_lab_simulator::Simulator;

fn simulator(version: ProtocolVersion, channel: ChannelParams, seed: u64) -> Simulator {
    let session = SessionConfig {
        version,
        window_size: 4,
        timeout_ms: 300,
        ..Default::default()
    };
    let config = SimConfig {
        channel,
        seed,
        max_tries: 500,
        ..Default::default()
    };
    Simulator::new(config, version, sender_for(&session), receiver_for(&session))
}

fn send_all(sim: &mut Simulator, messages: &[&str]) -> usize {
    let mut units = 0;
    for (i, message) in messages.iter().enumerate() {
        units += segments(sim.version(), message.as_bytes()).len();
        sim.schedule_message(i as u64, message.as_bytes());
    }
    units
}

const MESSAGES: [&str; 3] = ["reliable ", "data ", "transfer across the wraparound"];

#[test]
fn perfect_channel_needs_no_retransmissions() {
    for version in ProtocolVersion::ALL {
        let mut sim = simulator(version, ChannelParams::perfect(), 11);
        let units = send_all(&mut sim, &MESSAGES);
        sim.run_until_complete();

        assert_eq!(
            String::from_utf8(sim.delivered_stream()).unwrap(),
            MESSAGES.concat(),
            "version {version}"
        );
        assert_eq!(sim.sender_packet_count as usize, units, "version {version}");
        assert_eq!(sim.sender_timeouts, 0, "version {version}");
        assert!(sim.is_complete());
    }
}

#[test]
fn lossy_corrupting_channel_still_delivers_everything() {
    let channel = ChannelParams {
        drop_probability: 0.2,
        error_probability: 0.2,
        ..Default::default()
    };
    for version in [
        ProtocolVersion::Rdt22,
        ProtocolVersion::Rdt30,
        ProtocolVersion::Gbn,
        ProtocolVersion::Sr,
    ] {
        for seed in [1, 2, 3, 42] {
            let mut sim = simulator(version, channel, seed);
            let units = send_all(&mut sim, &MESSAGES);
            sim.run_until_complete();

            assert!(!sim.retry_budget_exhausted, "version {version} seed {seed}");
            assert_eq!(
                String::from_utf8(sim.delivered_stream()).unwrap(),
                MESSAGES.concat(),
                "version {version} seed {seed}"
            );
            assert!(sim.sender_packet_count as usize >= units);
            assert!(sim.is_complete());
        }
    }
}

#[test]
fn rdt21_recovers_from_corruption() {
    let channel = ChannelParams {
        error_probability: 0.3,
        ..Default::default()
    };
    let mut sim = simulator(ProtocolVersion::Rdt21, channel, 5);
    send_all(&mut sim, &MESSAGES);
    sim.run_until_complete();
    assert_eq!(
        String::from_utf8(sim.delivered_stream()).unwrap(),
        MESSAGES.concat()
    );
}

#[test]
fn delayed_packets_are_still_delivered_in_order() {
    let channel = ChannelParams {
        delay_probability: 0.5,
        delay_ms: 40,
        ..Default::default()
    };
    for version in [ProtocolVersion::Gbn, ProtocolVersion::Sr] {
        let mut sim = simulator(version, channel, 9);
        send_all(&mut sim, &MESSAGES);
        sim.run_until_complete();
        assert_eq!(
            String::from_utf8(sim.delivered_stream()).unwrap(),
            MESSAGES.concat(),
            "version {version}"
        );
    }
}

#[test]
fn sr_single_drop_costs_one_retransmission() {
    let mut sim = simulator(ProtocolVersion::Sr, ChannelParams::perfect(), 0);
    sim.add_drop_sender_seq_once(2);
    let units = send_all(&mut sim, &["abcd"]);
    sim.run_until_complete();

    assert_eq!(sim.delivered_stream(), b"abcd");
    assert_eq!(sim.sender_packet_count as usize - units, 1);
    assert_eq!(sim.sender_timeouts, 1);
}

#[test]
fn report_serialises_to_json() {
    let mut sim = simulator(ProtocolVersion::Gbn, ChannelParams::perfect(), 0);
    send_all(&mut sim, &["hi"]);
    sim.run_until_complete();

    let report = sim.export_report();
    assert_eq!(report.delivered_stream(), b"hi");
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["protocol"], "gbn");
    assert_eq!(json["sender_packet_count"], 2);
    assert_eq!(json["retry_budget_exhausted"], false);
    assert!(json["metrics"]["in_flight"].is_array());
}
