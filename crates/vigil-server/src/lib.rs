//! # vigil-server
//!
//! WebSocket relay of submission events. A connection is admitted by the
//! [`gate`] only with a valid login session; once it asks to start
//! monitoring, the [`monitor`] forwards every bus event the viewer is
//! cleared for until the connection goes away.

pub mod client;
pub mod connection;
pub mod gate;
pub mod health;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use gate::{ConnectionGate, Disconnectable};
pub use monitor::{MonitorConfig, MonitorStart, SubmissionMonitor};
pub use registry::ConnectionRegistry;
pub use server::{build_router, start, AppState, RelayContext, ServerHandle};
pub use session::{Handshake, SessionResolver};
