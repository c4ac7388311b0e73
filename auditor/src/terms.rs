//! Maps a listing's price schedule onto calendar windows counting down
//! to the pristine expiration, and attributes sold units to them.

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::config::ReconcileSettings;
use crate::model::{PriceScheduleTerm, SellEvent, TermWindow};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// One window per schedule term, highest term (earliest window) first.
    Windows(Vec<TermWindow>),
    /// The schedule does not fit the gap between publication and the
    /// pristine expiration; the expiration is probably not final yet.
    Deferred { expected: i64, actual: usize },
}

/// Whole windows between publication and pristine expiration.
pub fn expected_terms(
    published: DateTime<Utc>,
    pristine_expiration: DateTime<Utc>,
    window: TimeDelta,
) -> i64 {
    let window_secs = window.num_seconds();
    if window_secs <= 0 || pristine_expiration <= published {
        return 0;
    }
    (pristine_expiration - published).num_seconds() / window_secs
}

pub fn allocate(
    listing_id: Uuid,
    published: DateTime<Utc>,
    pristine_expiration: DateTime<Utc>,
    terms: &[PriceScheduleTerm],
    events: &[SellEvent],
    settings: &ReconcileSettings,
) -> Allocation {
    let window = settings.term_window;
    let expected = expected_terms(published, pristine_expiration, window);

    let mut ordered: Vec<&PriceScheduleTerm> = terms.iter().collect();
    ordered.sort_by_key(|t| std::cmp::Reverse(t.term));

    // Indices must be exactly expected, expected-1, ..., 1.
    let fits = ordered.len() as i64 == expected
        && ordered
            .iter()
            .zip((1..=expected).rev())
            .all(|(t, want)| t.term == want);
    if !fits {
        return Allocation::Deferred {
            expected,
            actual: terms.len(),
        };
    }

    let windows = ordered
        .iter()
        .map(|t| {
            let end = pristine_expiration - window * t.term as i32;
            let start = if t.term == expected {
                published
            } else {
                end - window
            };
            let mut w = TermWindow {
                listing_id,
                term: t.term,
                start,
                end,
                upfront_price: t.price,
                units_sold: 0,
            };
            let sold: i64 = events
                .iter()
                .filter(|e| w.contains(e.date))
                .map(|e| e.units_sold)
                .sum();
            w.units_sold = sold;
            w
        })
        .collect();

    Allocation::Windows(windows)
}
