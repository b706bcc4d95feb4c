//! `rappman-remote` – the robot's remote control channel.
//!
//! A WebSocket server through which a hub (or an operator's tooling) drives
//! the app lifecycle: start a rapp, stop the running one, query status, list
//! the catalog.  Requests carry the requesting hub's identity so the
//! whitelist policy is applied to every mutation; the server itself holds no
//! authorization logic.

pub mod server;

pub use server::{RemoteControlServer, Request, Response};
