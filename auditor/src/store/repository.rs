use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{FamilyKey, Listing, Relation, Reservation, TermWindow};

/// Everything the store holds for one family.
#[derive(Clone, Debug, Default)]
pub struct FamilyRecords {
    pub reservations: Vec<Reservation>,
    pub relations: Vec<Relation>,
}

/// Rows of one family that changed this cycle. Committed atomically so
/// an edge never lands without both of its endpoints.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FamilyWrite {
    pub reservations: Vec<Reservation>,
    pub relations: Vec<Relation>,
}

impl FamilyWrite {
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty() && self.relations.is_empty()
    }
}

/// Rows of one listing that changed this cycle, committed atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListingWrite {
    pub listing: Option<Listing>,
    /// Reservations re-tagged by the sell-event calculation.
    pub reservations: Vec<Reservation>,
    pub windows: Vec<TermWindow>,
    /// Stored windows whose start the current allocation no longer has.
    pub stale_windows: Vec<TermWindow>,
}

impl ListingWrite {
    pub fn is_empty(&self) -> bool {
        self.listing.is_none()
            && self.reservations.is_empty()
            && self.windows.is_empty()
            && self.stale_windows.is_empty()
    }
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// All reservations sharing `key`, plus every edge pointing into them.
    async fn fetch_family(&self, key: &FamilyKey) -> Result<FamilyRecords>;

    async fn fetch_listing(&self, id: &Uuid) -> Result<Option<Listing>>;

    /// Ordered by window start.
    async fn fetch_listing_terms(&self, listing_id: &Uuid) -> Result<Vec<TermWindow>>;

    async fn commit_family(&self, write: &FamilyWrite) -> Result<()>;

    async fn commit_listing(&self, write: &ListingWrite) -> Result<()>;
}
