pub mod repository;
pub mod repository_sqlx;
pub mod upsert;

pub use repository::{FamilyRecords, FamilyWrite, LedgerRepository, ListingWrite};
pub use repository_sqlx::SqlxLedgerRepository;
