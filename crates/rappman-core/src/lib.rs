//! `rappman-core` – registry, authorization and the lifecycle state machine.
//!
//! The decision-making half of the app manager.  It owns no network code;
//! everything network-facing (hub presence, the remote control channel) sits
//! in `rappman-gateway` and `rappman-remote` and talks to this crate through
//! plain method calls and broadcast events.
//!
//! # Modules
//!
//! - [`registry`] – [`RappRegistry`][registry::RappRegistry]: loads one or
//!   more TOML catalogs into an ordered, immutable id → descriptor map and
//!   splits entries into installed vs runnable.
//! - [`policy`] – [`WhitelistPolicy`][policy::WhitelistPolicy] and the
//!   pluggable [`PatternMatcher`][policy::PatternMatcher] abstraction with a
//!   glob-backed default.
//! - [`gate`] – [`AuthGate`][gate::AuthGate]: the single interception point
//!   every remote control request must pass before it may touch the
//!   lifecycle state machine.
//! - [`launcher`] – [`ProcessLauncher`][launcher::ProcessLauncher] /
//!   [`RappProcess`][launcher::RappProcess] seams over `tokio::process`.
//! - [`sim`] – in-memory launcher used by tests and demos.
//! - [`lifecycle`] – [`AppManager`][lifecycle::AppManager]: the
//!   single-tenant state machine.

pub mod gate;
pub mod launcher;
pub mod lifecycle;
pub mod policy;
pub mod registry;
pub mod sim;

pub use gate::{AuthGate, Verdict};
pub use launcher::{ProcessLauncher, RappExit, RappProcess, TokioLauncher};
pub use lifecycle::AppManager;
pub use policy::{GlobMatcher, PatternMatcher, WhitelistPolicy};
pub use registry::RappRegistry;
