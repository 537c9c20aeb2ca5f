//! Externally facing transports. Currently just the UI control-plane server
//! (C13); the OCPP wire side is a client, not a listener, so it lives under
//! `application::session` instead of here.

pub mod ui;
