use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rdt_lab_abstract::{ProtocolVersion, SessionConfig, SimConfig};
use rdt_lab_core::{Channel, Role, receiver_for, sender_for};
use rdt_lab_net::{Session, SessionSummary, Transport, UdpTransport};
use rdt_lab_simulator::{SimulationReport, Simulator, scenario_runner};

const DEFAULT_MESSAGE: &str = "Hello, reliable world!";

#[derive(Parser, Debug)]
#[command(author, about = "Reliable data transfer lab: RDT 1.0-3.0, Go-Back-N and Selective Repeat")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sender/receiver pair in the discrete-event simulator.
    Simulate(SimulateArgs),
    /// Send a message to a listening server, then tear the session down.
    Send(SendArgs),
    /// Receive until the client tears the session down.
    Serve(ServeArgs),
}

/// Settings shared by every subcommand; flags override the TOML file.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// TOML file with session settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Protocol: 1.0, 2.0, 2.1, 2.2, 3.0, gbn or sr.
    #[arg(long = "version", short = 'V', alias = "protocol")]
    protocol: Option<ProtocolVersion>,

    /// Probability that a packet is dropped.
    #[arg(long = "drop")]
    drop_probability: Option<f64>,

    /// Probability that a packet is delayed by --delay-ms.
    #[arg(long = "delay")]
    delay_probability: Option<f64>,

    /// Probability that a packet has a bit flipped.
    #[arg(long = "error")]
    error_probability: Option<f64>,

    #[arg(long)]
    delay_ms: Option<u64>,

    #[arg(long = "window")]
    window_size: Option<u8>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    max_tries: Option<u32>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Seed for the channel's random draws (OS entropy when omitted).
    #[arg(long)]
    seed: Option<u64>,
}

impl ConfigArgs {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => SessionConfig::default(),
        };
        if let Some(v) = self.protocol {
            config.version = v;
        }
        if let Some(v) = self.drop_probability {
            config.channel.drop_probability = v;
        }
        if let Some(v) = self.delay_probability {
            config.channel.delay_probability = v;
        }
        if let Some(v) = self.error_probability {
            config.channel.error_probability = v;
        }
        if let Some(v) = self.delay_ms {
            config.channel.delay_ms = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.max_tries {
            config.max_tries = v;
        }
        if let Some(v) = &self.host {
            config.host = v.clone();
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        config.validate().context("Invalid session configuration")?;
        Ok(config)
    }

    /// Start a live session, pinning the channel's draws when `--seed` is set.
    fn session<T: Transport>(&self, role: Role, config: SessionConfig, transport: T) -> Result<Session<T>> {
        let channel = config.channel;
        let session = Session::new(role, config, transport)?;
        Ok(match self.seed {
            Some(seed) => session.with_channel(Channel::seeded(channel, seed)),
            None => session,
        })
    }
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Message to transfer (ignored with --scenario).
    #[arg(long, short)]
    message: Option<String>,

    /// Run a TOML scenario with the builtin engines for its protocol.
    #[arg(long)]
    scenario: Option<PathBuf>,

    #[arg(long)]
    min_latency: Option<u64>,

    #[arg(long)]
    max_latency: Option<u64>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Message to deliver.
    message: String,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match cli.command {
        Command::Simulate(args) => simulate(args),
        Command::Send(args) => send(args).await,
        Command::Serve(args) => serve(args).await,
    }
}

fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<SessionConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn sim_config(args: &SimulateArgs, session: &SessionConfig) -> SimConfig {
    let mut config = SimConfig {
        channel: session.channel,
        ..Default::default()
    };
    if let Some(v) = args.config.seed {
        config.seed = v;
    }
    if let Some(v) = args.min_latency {
        config.min_latency = v;
    }
    if let Some(v) = args.max_latency {
        config.max_latency = v;
    }
    if let Some(v) = args.config.max_tries {
        config.max_tries = v;
    }
    config
}

fn simulate(args: SimulateArgs) -> Result<()> {
    let report = if let Some(path) = &args.scenario {
        scenario_runner::run_scenario_file(path)?
    } else {
        let session = args.config.session_config()?;
        let config = sim_config(&args, &session);
        if config.min_latency > config.max_latency {
            bail!(
                "--min-latency ({}) exceeds --max-latency ({})",
                config.min_latency,
                config.max_latency
            );
        }
        let message = args.message.as_deref().unwrap_or(DEFAULT_MESSAGE);
        info!(
            "Simulating {} with {} byte message",
            session.version,
            message.len()
        );

        let mut sim = Simulator::new(
            config,
            session.version,
            sender_for(&session),
            receiver_for(&session),
        );
        sim.schedule_message(0, message.as_bytes());
        sim.run_until_complete();
        sim.export_report()
    };

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }
    print_report(&report);

    if report.retry_budget_exhausted {
        bail!(
            "Sender gave up after {} timeouts",
            report.sender_timeouts
        );
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("protocol:        {}", report.protocol);
    println!(
        "delivered:       {:?}",
        String::from_utf8_lossy(&report.delivered_stream())
    );
    println!("sender packets:  {}", report.sender_packet_count);
    println!("sender timeouts: {}", report.sender_timeouts);
    println!("duration:        {} ms", report.duration_ms);
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}

async fn resolve(config: &SessionConfig) -> Result<SocketAddr> {
    tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", config.host, config.port))?
        .next()
        .with_context(|| format!("No address found for {}:{}", config.host, config.port))
}

fn print_summary(version: ProtocolVersion, summary: &SessionSummary) {
    println!("protocol:     {version}");
    println!("packets sent: {}", summary.packets_sent);
    println!("timeouts:     {}", summary.retransmit_timeouts);
}

async fn send(args: SendArgs) -> Result<()> {
    let config = args.config.session_config()?;
    let server = resolve(&config).await?;
    info!("Sending {} bytes to {server} using {}", args.message.len(), config.version);

    let transport = UdpTransport::connect(server)
        .await
        .with_context(|| format!("Failed to open socket towards {server}"))?;
    let version = config.version;
    let summary = args
        .config
        .session(Role::Sender, config, transport)?
        .run_sender(args.message.as_bytes())
        .await?;
    print_summary(version, &summary);
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.config.session_config()?;
    let addr = resolve(&config).await?;
    let transport = UdpTransport::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {addr} using {}", config.version);

    let version = config.version;
    let summary = args
        .config
        .session(Role::Receiver, config, transport)?
        .run_receiver()
        .await?;
    println!("received:     {:?}", String::from_utf8_lossy(&summary.delivered));
    print_summary(version, &summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "rdt-lab", "simulate", "--version", "sr", "--drop", "0.3", "--window", "3", "--seed",
            "9", "-m", "hey",
        ])
        .unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let session = args.config.session_config().unwrap();
        assert_eq!(session.version, ProtocolVersion::Sr);
        assert_eq!(session.window_size, 3);
        assert_eq!(session.channel.drop_probability, 0.3);

        let sim = sim_config(&args, &session);
        assert_eq!(sim.seed, 9);
        assert_eq!(sim.channel.drop_probability, 0.3);
    }

    #[test]
    fn bad_probability_is_rejected() {
        let cli = Cli::try_parse_from(["rdt-lab", "serve", "--error", "2"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.config.session_config().is_err());
    }

    #[test]
    fn unknown_protocol_fails_to_parse() {
        assert!(Cli::try_parse_from(["rdt-lab", "send", "--version", "4.0", "hi"]).is_err());
    }
}
