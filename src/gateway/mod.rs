//! WebSocket gateway for streaming review results to clients.
//!
//! Clients connect to `/ws`, receive a greeting carrying their
//! connection id, and then passively receive frames as workers process
//! jobs addressed to that id:
//!
//! ```text
//!   client ── connect ──▶ gateway ── register ──▶ registry
//!   client ◀── {"id": ...} ──┘
//!   worker ── lookup id ──▶ registry
//!   worker ── frames ──▶ connection channel ──▶ client
//! ```
//!
//! The registry is the only coupling between the gateway and the
//! worker; neither side holds the socket directly.

pub mod registry;
pub mod server;

// Re-export main types for convenience
pub use registry::{ConnectionHandle, ConnectionRegistry, DeliveryError, OutboundFrame, DONE_SENTINEL};
pub use server::{bind, router, DEFAULT_BIND_ADDR};
