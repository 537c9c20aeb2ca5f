pub mod store;

pub use store::{ConfigurationKey, ConfigurationStore};
