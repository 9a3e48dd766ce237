use bytes::Bytes;
use rdt_lab_abstract::{ConfigError, ProtocolVersion, SessionConfig, TransportProtocol};

use crate::gbn::{GbnReceiver, GbnSender};
use crate::rdt::{StopAndWaitReceiver, StopAndWaitSender};
use crate::sr::{SrReceiver, SrSender};
use crate::window::SeqSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

pub fn sender_for(config: &SessionConfig) -> Box<dyn TransportProtocol> {
    let space = SeqSpace::new(config.sequence_modulus());
    match config.version {
        ProtocolVersion::Gbn => Box::new(GbnSender::new(config.window_size, space, config.timeout_ms)),
        ProtocolVersion::Sr => Box::new(SrSender::new(config.window_size, space, config.timeout_ms)),
        version => Box::new(StopAndWaitSender::new(version, config.timeout_ms)),
    }
}

pub fn receiver_for(config: &SessionConfig) -> Box<dyn TransportProtocol> {
    let space = SeqSpace::new(config.sequence_modulus());
    match config.version {
        ProtocolVersion::Gbn => Box::new(GbnReceiver::new(space)),
        ProtocolVersion::Sr => Box::new(SrReceiver::new(config.window_size, space)),
        version => Box::new(StopAndWaitReceiver::new(version)),
    }
}

/// Split an application message into the units handed to `on_app_data`.
/// Windowed protocols carry one byte per packet; stop-and-wait sends the
/// message whole.
pub fn segments(version: ProtocolVersion, message: &[u8]) -> Vec<Bytes> {
    if version.is_stop_and_wait() {
        vec![Bytes::copy_from_slice(message)]
    } else {
        message.chunks(1).map(Bytes::copy_from_slice).collect()
    }
}

/// Validate `config` and build the engine for `role`.
pub fn engine_for(role: Role, config: &SessionConfig) -> Result<Box<dyn TransportProtocol>, ConfigError> {
    config.validate()?;
    Ok(match role {
        Role::Sender => sender_for(config),
        Role::Receiver => receiver_for(config),
    })
}

/// Map a user-visible protocol name (`"3.0"`, `"gbn"`, ...) to an engine.
pub fn builtin_by_name(
    name: &str,
    role: Role,
    base: &SessionConfig,
) -> Result<Box<dyn TransportProtocol>, ConfigError> {
    let config = SessionConfig {
        version: name.parse()?,
        ..base.clone()
    };
    engine_for(role, &config)
}
