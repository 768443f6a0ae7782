//! Endpoint-selection and congestion-aware packet transport for real-time
//! P2P voice calls: handshake, reliable control messages, jitter-aware
//! reassembly with parity FEC, congestion control, and a paced send path,
//! all independent of any particular audio/video codec or socket source.

pub mod bufferpool;
pub mod clock;
pub mod config;
pub mod congestion;
pub mod controller;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod extras;
pub mod framer;
pub mod pacer;
pub mod packet;
pub mod reassembler;
pub mod seq;
pub mod socket;
pub mod state;
pub mod stream;
pub mod util;

pub use config::{DataSavingMode, EngineConfig, ServerConfig};
pub use controller::{Controller, ConnectionState};
pub use error::{CallError, EngineError, Result};
