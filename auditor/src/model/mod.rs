pub mod lifecycle;
pub mod listing;
pub mod reservation;

pub use lifecycle::{Lifecycle, LifecycleTag};
pub use listing::{
    Listing, ListingCounts, ListingSnapshot, ListingState, PriceScheduleTerm, SellEvent,
    TermWindow,
};
pub use reservation::{FamilyKey, MAX_DURATION_SECS, OfferClass, Relation, Reservation, Scope};

/// Money amounts are kept as integers scaled by 1e8 so that price
/// signatures compare exactly across polls and database round-trips.
pub type PriceE8 = i64;

pub fn to_e8(amount: f64) -> PriceE8 {
    (amount * 1e8).round() as i64
}

pub fn from_e8(amount: PriceE8) -> f64 {
    amount as f64 / 1e8
}
