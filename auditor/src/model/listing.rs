use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{PriceE8, Scope};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListingState {
    Available,
    Sold,
    Cancelled,
    Pending,
}

impl FromStr for ListingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ListingState::Available),
            "sold" => Ok(ListingState::Sold),
            "cancelled" => Ok(ListingState::Cancelled),
            "pending" => Ok(ListingState::Pending),
            other => Err(format!("unknown listing state '{other}'")),
        }
    }
}

/// Per-state instance counts. Rewritten from scratch every cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListingCounts {
    pub available: i64,
    pub sold: i64,
    pub cancelled: i64,
    pub pending: i64,
}

impl ListingCounts {
    pub fn add(&mut self, state: ListingState, count: i64) {
        let slot = match state {
            ListingState::Available => &mut self.available,
            ListingState::Sold => &mut self.sold,
            ListingState::Cancelled => &mut self.cancelled,
            ListingState::Pending => &mut self.pending,
        };
        *slot += count;
    }
}

/// Persisted view of a secondary-market listing.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing {
    pub id: Uuid,
    pub source_reservation_id: Uuid,
    pub region: String,
    pub scope: Scope,
    pub az: String,
    pub instance_type: String,
    pub instance_family: String,
    pub units: f64,
    pub product: String,
    pub published: DateTime<Utc>,
    pub status: String,
    pub status_message: String,
    pub counts: ListingCounts,
}

/// One price schedule element: `term` counts windows remaining until
/// the pristine expiration of the source reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceScheduleTerm {
    pub term: i64,
    pub price: PriceE8,
    pub active: bool,
}

/// A listing as observed in one snapshot, with its price schedules.
/// Schedules are consumed by the term allocator and not stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ListingSnapshot {
    pub listing: Listing,
    /// Live schedule as currently reported.
    pub price_schedule: Vec<PriceScheduleTerm>,
    /// Schedule the listing was created with; empty when unknown.
    pub original_schedule: Vec<PriceScheduleTerm>,
}

impl ListingSnapshot {
    pub fn active_term(&self) -> Option<&PriceScheduleTerm> {
        self.price_schedule.iter().find(|t| t.active)
    }

    /// Schedule the term windows are allocated from: the creation-time
    /// schedule when known, the live one otherwise.
    pub fn allocation_schedule(&self) -> &[PriceScheduleTerm] {
        if self.original_schedule.is_empty() {
            &self.price_schedule
        } else {
            &self.original_schedule
        }
    }
}

/// Calendar interval `[start, end)` over which one schedule term applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermWindow {
    pub listing_id: Uuid,
    pub term: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub upfront_price: PriceE8,
    pub units_sold: i64,
}

impl TermWindow {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Units that left a reservation through a listing at a given date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SellEvent {
    pub reservation_id: Uuid,
    pub listing_id: Uuid,
    pub date: DateTime<Utc>,
    pub units_sold: i64,
}
