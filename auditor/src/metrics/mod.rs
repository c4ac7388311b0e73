pub mod counters;
pub mod observations;

pub use counters::Counters;
pub use observations::{
    CycleObservations, Gauge, ListingObservation, ObservationView, ReservationObservation,
    TermObservation,
};
