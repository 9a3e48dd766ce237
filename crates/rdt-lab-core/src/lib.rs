//! Protocol engines and the unreliable channel they are tested against.

pub mod builtin;
pub mod channel;
pub mod error;
pub mod gbn;
pub mod rdt;
pub mod sr;
pub mod window;

#[cfg(test)]
mod testing;

pub use builtin::{Role, builtin_by_name, engine_for, receiver_for, segments, sender_for};
pub use channel::{Channel, Outcome, RandomSource, ScriptedDraws, TenthsRng};
pub use error::SessionError;
pub use gbn::{GbnPacketStatus, GbnReceiver, GbnSender};
pub use rdt::{RdtReceiveStatus, RdtVariables, StopAndWaitReceiver, StopAndWaitSender};
pub use sr::{ReceiveBuffer, SrAckKind, SrReceiver, SrSender, deliver_data};
pub use window::{SenderWindow, SeqSpace};
