pub mod model;

pub use model::{StopReason, Transaction, TransactionId};
