pub mod model;

pub use model::{
    Availability, AvailabilityChangeOutcome, ChargingProfileSlot, Connector, ConnectorStatus,
};
