//! Cross-cutting utilities: wire framing, errors, shutdown, retry, id generation.

pub mod errors;
pub mod ids;
pub mod ocpp_frame;
pub mod retry;
pub mod shutdown;

pub use errors::{InfraError, SimError, TransportError};
pub use ocpp_frame::{OcppFrame, OcppFrameError};
