//! Application layer: wire codec, session transport, correlation, command
//! builders, incoming-command handlers, the automatic transaction generator,
//! and the station lifecycle FSM that ties them together.

pub mod atg;
pub mod commands;
pub mod correlator;
pub mod handlers;
pub mod session;
pub mod station;

pub use station::{spawn, StationDeps, StationFsmState, StationHandle};
