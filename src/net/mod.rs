// net/mod.rs
//! Networking layer: the byte relay between client and backend sockets.

pub mod relay;

pub use relay::{Direction, RelayReport, RelaySettings, relay};
