//! EV charging-station fleet simulator speaking OCPP 1.6 and 2.0.1.
//!
//! `application` drives the station lifecycle over a framed transport,
//! `worker` hosts many stations per process behind a pool, `interfaces::ui`
//! exposes the fleet to an operator, and `supervisor` wires the three
//! together into one runnable instance.

pub mod application;
pub mod broadcast;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod support;
pub mod supervisor;
pub mod worker;

pub use config::{default_config_path, AppConfig};
pub use supervisor::{init_tracing, SupervisorHandle, SupervisorOptions};
