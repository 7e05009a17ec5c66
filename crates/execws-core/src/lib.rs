//! Core machinery for executing commands in Kubernetes pods over WebSockets.
//!
//! The standard SPDY-based exec transport does not survive some reverse
//! proxies and load balancers; the WebSocket transport does. This crate
//! provides everything between a parsed command line and a process exit
//! code:
//!
//! - [`protocol`] — the channel-multiplexed wire format (binary and base64
//!   subprotocols) and the channel-3 status payload,
//! - [`cluster`] — kubeconfig loading, TLS setup, credential headers and the
//!   preflight pod lookup,
//! - [`request`] — exec URL construction for the API server and for the
//!   kubelet's direct exec endpoint,
//! - [`transport`] — the WebSocket dial and handshake-error decoding,
//! - [`session`] — the streaming session itself,
//! - [`terminal`] — raw mode, window size, and resize notifications.

pub mod cluster;
pub mod error;
pub mod options;
pub mod protocol;
pub mod request;
pub mod session;
pub mod terminal;
pub mod transport;

pub use error::{Error, Result};
pub use options::Options;
pub use protocol::{Subprotocol, TermSize};
pub use session::SessionIo;
