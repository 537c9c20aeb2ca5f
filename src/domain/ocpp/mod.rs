pub mod identifier;
pub mod version;

pub use identifier::{Identifier, IdentifierType};
pub use version::OcppVersion;
