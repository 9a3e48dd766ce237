use anyhow::{Context, anyhow, bail};
use rdt_lab_abstract::{
    SessionConfig, SimConfig, TestAction, TestAssertion, TestScenario, TransportProtocol,
};
use rdt_lab_core::Role;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::Simulator;
use crate::trace::SimulationReport;

const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

pub fn load_scenario(path: impl AsRef<Path>) -> anyhow::Result<TestScenario> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse scenario {}", path.display()))
}

/// Engine configuration implied by a scenario's protocol fields.
pub fn session_config(scenario: &TestScenario) -> SessionConfig {
    let defaults = SessionConfig::default();
    SessionConfig {
        version: scenario.protocol,
        window_size: scenario.window_size,
        timeout_ms: scenario.timeout_ms.unwrap_or(defaults.timeout_ms),
        ..defaults
    }
}

/// Run a scenario against the builtin engines for its protocol.
pub fn run_builtin_scenario(scenario: &TestScenario) -> anyhow::Result<SimulationReport> {
    let session = session_config(scenario);
    let sender = rdt_lab_core::engine_for(Role::Sender, &session)
        .with_context(|| format!("Invalid protocol settings in scenario '{}'", scenario.name))?;
    let receiver = rdt_lab_core::engine_for(Role::Receiver, &session)?;
    run_scenario(scenario, sender, receiver)
}

pub fn run_scenario_file(path: impl AsRef<Path>) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    run_builtin_scenario(&scenario)
}

pub fn run_scenario(
    scenario: &TestScenario,
    sender: Box<dyn TransportProtocol>,
    receiver: Box<dyn TransportProtocol>,
) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    config
        .channel
        .validate()
        .with_context(|| format!("Invalid channel settings in scenario '{}'", scenario.name))?;
    if config.min_latency > config.max_latency {
        bail!(
            "Scenario '{}' has min_latency {} above max_latency {}",
            scenario.name,
            config.min_latency,
            config.max_latency
        );
    }

    let mut sim = Simulator::new(config, scenario.protocol, sender, receiver);

    for action in &scenario.actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_message(*time, data.as_bytes());
            }
            TestAction::DropNextFromSenderSeq { seq } => {
                sim.add_drop_sender_seq_once(*seq);
            }
            TestAction::DropNextFromReceiverAck { ack } => {
                sim.add_drop_receiver_ack_once(*ack);
            }
        }
    }

    sim.init();

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    while sim.step() {
        if sim.current_time() > max_duration {
            bail!("Test timed out after {} ms", max_duration);
        }
    }

    if sim.retry_budget_exhausted {
        bail!(
            "Sender gave up after {} timeouts (max_tries = {})",
            sim.sender_timeouts,
            sim.config().max_tries
        );
    }

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::DataDelivered { data } => {
                let found = sim.delivered_data.iter().any(|d| d == data.as_bytes());
                if !found {
                    return Err(anyhow!(
                        "Assertion Failed: Data {:?} was not delivered",
                        data
                    ));
                }
            }
            TestAssertion::DeliveredStream { data } => {
                let stream = sim.delivered_stream();
                if stream != data.as_bytes() {
                    return Err(anyhow!(
                        "Assertion Failed: delivered {:?}, expected {:?}",
                        String::from_utf8_lossy(&stream),
                        data
                    ));
                }
            }
            TestAssertion::SenderPacketCount { min, max } => {
                if sim.sender_packet_count < *min {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected min {}",
                        sim.sender_packet_count,
                        min
                    ));
                }
                if let Some(max) = max
                    && sim.sender_packet_count > *max
                {
                    return Err(anyhow!(
                        "Assertion Failed: Sender sent {} packets, expected max {}",
                        sim.sender_packet_count,
                        max
                    ));
                }
            }
            TestAssertion::MaxSenderTimeouts { max } => {
                if sim.sender_timeouts > *max {
                    return Err(anyhow!(
                        "Assertion Failed: Sender timed out {} times, expected at most {}",
                        sim.sender_timeouts,
                        max
                    ));
                }
            }
            TestAssertion::MaxDuration { .. } => {} // checked while running
        }
    }

    info!("Test Scenario Passed!");
    Ok(sim.export_report())
}
