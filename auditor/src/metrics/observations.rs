//! Latest computed values per region, flattened into labeled gauges for
//! whatever exposition layer scrapes them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::model::{Lifecycle, PriceE8, from_e8};

#[derive(Clone, Debug, PartialEq)]
pub struct ReservationObservation {
    pub reservation_id: Uuid,
    pub lifecycle: Lifecycle,
    pub pristine_expiration: Option<DateTime<Utc>>,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListingObservation {
    pub listing_id: Uuid,
    pub reservation_id: Uuid,
    pub sold: i64,
    /// Months left on the currently active price schedule entry.
    pub active_term: Option<i64>,
    pub deferred: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TermObservation {
    pub listing_id: Uuid,
    pub term: i64,
    pub start: DateTime<Utc>,
    pub price: PriceE8,
    pub units_sold: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleObservations {
    pub taken_at: Option<DateTime<Utc>>,
    pub reservations: Vec<ReservationObservation>,
    pub listings: Vec<ListingObservation>,
    pub terms: Vec<TermObservation>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Gauge {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Gauge {
    fn new(name: &'static str, labels: Vec<(&'static str, String)>, value: f64) -> Self {
        Self {
            name,
            labels,
            value,
        }
    }
}

/// Read-only view refreshed once per cycle. Last write wins per region.
#[derive(Clone, Default)]
pub struct ObservationView {
    inner: Arc<RwLock<HashMap<String, CycleObservations>>>,
}

impl ObservationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, region: &str, observations: CycleObservations) {
        self.inner.write().insert(region.to_string(), observations);
    }

    pub fn get(&self, region: &str) -> Option<CycleObservations> {
        self.inner.read().get(region).cloned()
    }

    /// Flattens every region into gauges, sorted by region.
    pub fn gauges(&self) -> Vec<Gauge> {
        let guard = self.inner.read();
        let mut regions: Vec<&String> = guard.keys().collect();
        regions.sort();

        let mut out = Vec::new();
        for region in regions {
            let obs = &guard[region];

            for r in &obs.reservations {
                let labels = vec![
                    ("region", region.clone()),
                    ("reservation_id", r.reservation_id.to_string()),
                ];
                out.push(Gauge::new(
                    "reservation_lifecycle",
                    with(&labels, "lifecycle", r.lifecycle.to_string()),
                    f64::from(r.lifecycle.bits()),
                ));
                out.push(Gauge::new("reservation_count", labels.clone(), r.count as f64));
                if let Some(p) = r.pristine_expiration {
                    out.push(Gauge::new(
                        "reservation_pristine_expiration_seconds",
                        labels,
                        p.timestamp() as f64,
                    ));
                }
            }

            for l in &obs.listings {
                let labels = vec![
                    ("region", region.clone()),
                    ("listing_id", l.listing_id.to_string()),
                    ("reservation_id", l.reservation_id.to_string()),
                ];
                out.push(Gauge::new("listing_sold_units", labels.clone(), l.sold as f64));
                out.push(Gauge::new(
                    "listing_deferred",
                    labels.clone(),
                    if l.deferred { 1.0 } else { 0.0 },
                ));
                if let Some(t) = l.active_term {
                    out.push(Gauge::new("listing_active_term_months", labels, t as f64));
                }
            }

            for t in &obs.terms {
                let labels = vec![
                    ("region", region.clone()),
                    ("listing_id", t.listing_id.to_string()),
                    ("term", t.term.to_string()),
                    ("start", t.start.to_rfc3339()),
                ];
                out.push(Gauge::new("listing_term_price", labels.clone(), from_e8(t.price)));
                out.push(Gauge::new("listing_term_sold_units", labels, t.units_sold as f64));
            }
        }
        out
    }
}

fn with(
    labels: &[(&'static str, String)],
    key: &'static str,
    value: String,
) -> Vec<(&'static str, String)> {
    let mut out = labels.to_vec();
    out.push((key, value));
    out
}
