pub mod model;

pub use model::{
    BootStatus, ConnectionState, PerformanceCounters, Station, SupervisionUrlDistribution,
    SupervisionUrls,
};
