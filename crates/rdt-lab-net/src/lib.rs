pub mod session;
pub mod transport;

pub use session::{Session, SessionState, SessionSummary};
pub use transport::{MemoryTransport, Transport, UdpTransport, memory_pair};
