//! Outgoing command builders (C9): build OCPP request payloads from domain
//! state, and fold CSMS responses back into that state. One module per
//! protocol version since the wire shapes genuinely differ (idTag vs
//! idToken, StartTransaction/StopTransaction vs TransactionEvent).

pub mod v16;
pub mod v201;
