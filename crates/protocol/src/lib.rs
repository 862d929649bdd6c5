//! Wire protocols for the Ozone core.
//!
//! Four request/response protocols share one framing: a 4-byte big-endian
//! length prefix followed by a JSON-encoded message. Connections carry
//! sequential request/response pairs and are reused until either side
//! closes them.

pub mod client;
pub mod codec;
pub mod container;
pub mod datanode;
pub mod ksm;
pub mod scm;
pub mod server;

pub use codec::{read_frame, write_frame, ProtocolError, MAX_FRAME_LEN};

/// Version negotiated by `GetVersion` before registration.
pub const PROTOCOL_VERSION: u32 = 1;
