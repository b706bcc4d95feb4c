//! `rappman-gateway` – the robot's outward face on the multi-master network.
//!
//! Maintains the robot's identity on the hub and keeps the advertised
//! endpoint set in step with the lifecycle state machine and the whitelist
//! policy, recovering from transient hub disconnects.
//!
//! # Modules
//!
//! - [`hub`] – the [`HubClient`][hub::HubClient] seam (connect / advertise /
//!   withdraw / loss notification) plus the in-memory [`SimHub`][hub::SimHub]
//!   twin for tests.
//! - [`ws_hub`] – [`WsHubClient`][ws_hub::WsHubClient]: JSON op frames over
//!   a WebSocket, with per-attempt deadlines and a background read task that
//!   detects connection loss.
//! - [`presence`] – [`PresenceController`][presence::PresenceController]:
//!   owns the advertised endpoint set, flips idempotently, records failed
//!   flips as pending for the watch loop to reconcile.
//! - [`watch`] – [`WatchLoop`][watch::WatchLoop]: the fixed-period
//!   reconciliation task.

pub mod hub;
pub mod presence;
pub mod watch;
pub mod ws_hub;

pub use hub::{HubClient, SimHub};
pub use presence::{PresenceChange, PresenceController, PresenceEvent};
pub use watch::WatchLoop;
pub use ws_hub::WsHubClient;
