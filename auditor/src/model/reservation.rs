use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::{Lifecycle, PriceE8};

/// Longest term the provider sells: three years.
pub const MAX_DURATION_SECS: i64 = 94_608_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OfferClass {
    Standard,
    Convertible,
    Scheduled,
}

impl OfferClass {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferClass::Standard => "standard",
            OfferClass::Convertible => "convertible",
            OfferClass::Scheduled => "scheduled",
        }
    }
}

impl FromStr for OfferClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(OfferClass::Standard),
            "convertible" => Ok(OfferClass::Convertible),
            "scheduled" => Ok(OfferClass::Scheduled),
            other => Err(format!("unknown offer class '{other}'")),
        }
    }
}

impl fmt::Display for OfferClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Region,
    AvailabilityZone,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Region => "Region",
            Scope::AvailabilityZone => "Availability Zone",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Region" => Ok(Scope::Region),
            "Availability Zone" => Ok(Scope::AvailabilityZone),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

/// Attributes every member of one lineage tree shares.
///
/// Convertible reservations can be exchanged across instance families,
/// offer types and products, so for them only duration, class and region
/// bind the family together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyKey {
    pub region: String,
    pub duration_secs: i64,
    pub offer_class: OfferClass,
    pub instance_family: Option<String>,
    pub offer_type: Option<String>,
    pub product: Option<String>,
    pub tenancy: Option<String>,
}

impl FamilyKey {
    /// True when the non-convertible attributes take part in the key.
    pub fn is_attribute_bound(&self) -> bool {
        self.offer_class != OfferClass::Convertible
    }
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}s",
            self.region, self.offer_class, self.duration_secs
        )?;
        if let Some(family) = &self.instance_family {
            write!(f, "/{family}")?;
        }
        Ok(())
    }
}

/// One purchased block of reserved capacity, as last observed plus
/// everything the reconciler has learned about it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub region: String,
    pub scope: Scope,
    /// "none" for region-scoped reservations.
    pub az: String,
    pub instance_type: String,
    pub instance_family: String,
    /// Normalization units of a single instance.
    pub units: f64,
    pub offer_class: OfferClass,
    pub offer_type: String,
    pub product: String,
    pub tenancy: String,
    /// Provider state (active, retired, ...).
    pub state: String,

    pub duration_secs: i64,
    pub start: DateTime<Utc>,
    /// Provider-reported end; truncated when units are sold off.
    pub end: DateTime<Utc>,
    /// Computed end the reservation would have had absent any sale.
    pub original_end: Option<DateTime<Utc>>,

    pub count: i64,
    pub upfront_price: PriceE8,
    pub recurring_charges: PriceE8,
    pub effective_price: PriceE8,

    pub lifecycle: Lifecycle,
    /// Listings under which this reservation (or a unit of it) was offered.
    pub listed_on: Vec<Uuid>,
}

impl Reservation {
    pub fn family_key(&self) -> FamilyKey {
        let bound = self.offer_class != OfferClass::Convertible;
        let attr = |v: &String| bound.then(|| v.clone());

        FamilyKey {
            region: self.region.clone(),
            duration_secs: self.duration_secs,
            offer_class: self.offer_class,
            instance_family: attr(&self.instance_family),
            offer_type: attr(&self.offer_type),
            product: attr(&self.product),
            tenancy: attr(&self.tenancy),
        }
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.duration_secs)
    }

    /// End date of a reservation that still runs its full term.
    pub fn full_term_end(&self, boundary_offset: TimeDelta) -> DateTime<Utc> {
        self.start + self.duration() - boundary_offset
    }

    /// Adds listing references, keeping the list sorted and unique.
    pub fn absorb_listings(&mut self, listings: &[Uuid]) {
        self.listed_on.extend_from_slice(listings);
        self.listed_on.sort();
        self.listed_on.dedup();
    }
}

/// Directed parent -> child edge in the lineage forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relation {
    pub parent_id: Uuid,
    pub child_id: Uuid,
}

impl Relation {
    pub fn new(parent_id: Uuid, child_id: Uuid) -> Self {
        Self {
            parent_id,
            child_id,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub const ONE_YEAR: i64 = 31_536_000;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// A region-scoped standard reservation running its full term.
    pub fn reservation(count: i64, start: DateTime<Utc>) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            region: "us-east-1".into(),
            scope: Scope::Region,
            az: "none".into(),
            instance_type: "m5.large".into(),
            instance_family: "m5".into(),
            units: 4.0,
            offer_class: OfferClass::Standard,
            offer_type: "All Upfront".into(),
            product: "Linux/UNIX".into(),
            tenancy: "default".into(),
            state: "active".into(),
            duration_secs: ONE_YEAR,
            start,
            end: start + TimeDelta::seconds(ONE_YEAR - 1),
            original_end: None,
            count,
            upfront_price: 50_000_000_000,
            recurring_charges: 0,
            effective_price: 5_707_763,
            lifecycle: Lifecycle::EMPTY,
            listed_on: vec![],
        }
    }
}
