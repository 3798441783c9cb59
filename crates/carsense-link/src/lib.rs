//! carsense-link - diagnostic bus link layer
//!
//! This crate owns everything between raw adapter bytes and typed readings:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 DiagSession                   │
//! │  state machine: handshake, retry, degrade    │
//! │                      │                        │
//! │                 ┌────┴────┐                   │
//! │                 │  codec  │                   │
//! │                 │ (pure)  │                   │
//! │                 └────┬────┘                   │
//! │              ┌───────┴────────┐               │
//! │              │   Transport    │               │
//! │              │ (tcp/serial/   │               │
//! │              │     mock)      │               │
//! │              └────────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The transport layer carries bytes and nothing else; the codec is a set of
//! pure functions keyed by protocol family; the session sequences handshake,
//! polling, fault handling and teardown on top of both.

pub mod codec;
pub mod session;
pub mod transport;

pub use codec::{decode_response, decode_value, encode_request, CodecError, Command, Frame};
pub use session::{DiagSession, SessionError, SessionStats};
pub use transport::{open_transport, Transport, TransportError};
