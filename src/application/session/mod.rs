pub mod ws;

pub use ws::{Session, SessionEvent, SessionHandle};
