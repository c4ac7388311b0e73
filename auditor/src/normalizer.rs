//! Turns one raw provider snapshot into typed reservations, listings and
//! modification events. Bad records are logged and skipped one by one.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::NormalizeError;
use crate::model::{
    Lifecycle, Listing, ListingCounts, ListingSnapshot, ListingState, PriceScheduleTerm,
    MAX_DURATION_SECS, Reservation, Scope, to_e8,
};
use crate::provider::{
    RawListing, RawModification, RawPriceSchedule, RawReservation, RawSnapshot,
};

/// Placeholder availability zone for region-scoped records.
pub const NO_AZ: &str = "none";

/// Provider-reported reshape linking parent reservations to their results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification {
    pub parents: Vec<Uuid>,
    pub results: Vec<Uuid>,
    pub fulfilled: bool,
}

#[derive(Clone, Debug)]
pub struct NormalizedSnapshot {
    pub region: String,
    pub taken_at: DateTime<Utc>,
    /// Oldest start first, so parents are seen before their descendants.
    pub reservations: Vec<Reservation>,
    pub listings: Vec<ListingSnapshot>,
    pub modifications: Vec<Modification>,
    /// Records dropped because they could not be normalized.
    pub skipped: usize,
}

/// Normalizes a snapshot. Only an unusable region or snapshot timestamp
/// fails the whole snapshot; every other problem skips one record.
pub fn normalize(
    raw: &RawSnapshot,
    now: DateTime<Utc>,
) -> Result<NormalizedSnapshot, NormalizeError> {
    let region = raw.region.trim();
    if region.is_empty() {
        return Err(NormalizeError::MissingField("Region"));
    }
    let taken_at = match raw.taken_at.as_deref() {
        Some(s) => parse_date("TakenAt", s)?,
        None => now,
    };

    let mut skipped = 0;

    let mut reservations = Vec::with_capacity(raw.reserved_instances.len());
    for r in &raw.reserved_instances {
        match normalize_reservation(region, r) {
            Ok(res) => reservations.push(res),
            Err(e) => {
                warn!(id = %r.reserved_instances_id, error = %e, "skipping reservation record");
                skipped += 1;
            }
        }
    }

    let index: HashMap<Uuid, usize> = reservations
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id, i))
        .collect();

    let mut listings = Vec::with_capacity(raw.reserved_instances_listings.len());
    for l in &raw.reserved_instances_listings {
        match normalize_listing(l, &reservations, &index) {
            Ok(Some(snap)) => {
                if let Some(&src) = index.get(&snap.listing.source_reservation_id) {
                    reservations[src].absorb_listings(&[snap.listing.id]);
                }
                listings.push(snap);
            }
            Ok(None) => {
                warn!(
                    listing_id = %l.reserved_instances_listing_id,
                    source = %l.reserved_instances_id,
                    "listing source reservation not in snapshot; skipping"
                );
                skipped += 1;
            }
            Err(e) => {
                warn!(listing_id = %l.reserved_instances_listing_id, error = %e, "skipping listing record");
                skipped += 1;
            }
        }
    }

    let mut modifications = Vec::with_capacity(raw.reserved_instances_modifications.len());
    for m in &raw.reserved_instances_modifications {
        match normalize_modification(m) {
            Ok(m) => modifications.push(m),
            Err(e) => {
                warn!(
                    modification_id = m.reserved_instances_modification_id.as_deref().unwrap_or("?"),
                    error = %e,
                    "skipping modification record"
                );
                skipped += 1;
            }
        }
    }

    reservations.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));

    debug!(
        reservations = reservations.len(),
        listings = listings.len(),
        modifications = modifications.len(),
        skipped,
        "snapshot normalized"
    );

    Ok(NormalizedSnapshot {
        region: region.to_string(),
        taken_at,
        reservations,
        listings,
        modifications,
        skipped,
    })
}

fn normalize_reservation(region: &str, r: &RawReservation) -> Result<Reservation, NormalizeError> {
    let id = parse_id("ReservedInstancesId", &r.reserved_instances_id)?;

    let scope = match r.scope.as_deref() {
        None => Scope::Region,
        Some(s) => s.parse().map_err(|reason| NormalizeError::InvalidValue {
            field: "Scope",
            reason,
        })?,
    };
    let az = match (scope, r.availability_zone.as_deref()) {
        (Scope::Region, _) => NO_AZ.to_string(),
        (Scope::AvailabilityZone, Some(az)) if !az.is_empty() => az.to_string(),
        (Scope::AvailabilityZone, _) => return Err(NormalizeError::MissingField("AvailabilityZone")),
    };

    let instance_type = required("InstanceType", &r.instance_type)?;
    let (instance_family, units) = instance_type_details(&instance_type)?;

    let duration_secs = r.duration.ok_or(NormalizeError::MissingField("Duration"))?;
    if !(1..=MAX_DURATION_SECS).contains(&duration_secs) {
        return Err(NormalizeError::InvalidValue {
            field: "Duration",
            reason: format!("duration {duration_secs} outside 1..={MAX_DURATION_SECS}"),
        });
    }

    let start = parse_date("Start", &required("Start", &r.start)?)?;
    if start
        .checked_add_signed(TimeDelta::seconds(duration_secs))
        .is_none()
    {
        return Err(NormalizeError::InvalidValue {
            field: "Start",
            reason: format!("term from {start} overflows"),
        });
    }
    let end = parse_date("End", &required("End", &r.end)?)?;

    let offer_class = required("OfferingClass", &r.offering_class)?
        .parse()
        .map_err(|reason| NormalizeError::InvalidValue {
            field: "OfferingClass",
            reason,
        })?;

    let fixed = r.fixed_price.unwrap_or(0.0);
    let recurring = r
        .recurring_charges
        .first()
        .and_then(|c| c.amount)
        .unwrap_or(0.0);
    let effective = recurring + fixed / duration_secs as f64 * 3600.0;

    let mut listed_on = Vec::with_capacity(r.reserved_instances_listing_ids.len());
    for raw_id in &r.reserved_instances_listing_ids {
        listed_on.push(parse_id("ReservedInstancesListingIds", raw_id)?);
    }
    listed_on.sort();
    listed_on.dedup();

    Ok(Reservation {
        id,
        region: region.to_string(),
        scope,
        az,
        instance_type,
        instance_family,
        units,
        offer_class,
        offer_type: required("OfferingType", &r.offering_type)?,
        product: required("ProductDescription", &r.product_description)?,
        tenancy: r.instance_tenancy.clone().unwrap_or_else(|| "default".to_string()),
        state: r.state.clone().unwrap_or_else(|| "active".to_string()),
        duration_secs,
        start,
        end,
        original_end: None,
        count: r.instance_count.unwrap_or(0),
        upfront_price: to_e8(fixed),
        recurring_charges: to_e8(recurring),
        effective_price: to_e8(effective),
        lifecycle: Lifecycle::EMPTY,
        listed_on,
    })
}

/// Returns `Ok(None)` when the source reservation is not part of the
/// snapshot: its attributes cannot be inherited.
fn normalize_listing(
    l: &RawListing,
    reservations: &[Reservation],
    index: &HashMap<Uuid, usize>,
) -> Result<Option<ListingSnapshot>, NormalizeError> {
    let id = parse_id("ReservedInstancesListingId", &l.reserved_instances_listing_id)?;
    let source_id = parse_id("ReservedInstancesId", &l.reserved_instances_id)?;
    let published = parse_date("CreateDate", &required("CreateDate", &l.create_date)?)?;
    let status = required("Status", &l.status)?;

    let mut counts = ListingCounts::default();
    for c in &l.instance_counts {
        let state: ListingState = required("InstanceCounts.State", &c.state)?
            .parse()
            .map_err(|reason| NormalizeError::InvalidValue {
                field: "InstanceCounts.State",
                reason,
            })?;
        counts.add(state, c.instance_count.unwrap_or(0));
    }

    let price_schedule = parse_schedule("PriceSchedules.Term", &l.price_schedules)?;
    let original_schedule =
        parse_schedule("OriginalPriceSchedules.Term", &l.original_price_schedules)?;

    let Some(&src) = index.get(&source_id) else {
        return Ok(None);
    };
    let source = &reservations[src];

    Ok(Some(ListingSnapshot {
        listing: Listing {
            id,
            source_reservation_id: source_id,
            region: source.region.clone(),
            scope: source.scope,
            az: source.az.clone(),
            instance_type: source.instance_type.clone(),
            instance_family: source.instance_family.clone(),
            units: source.units,
            product: source.product.clone(),
            published,
            status,
            status_message: l.status_message.clone().unwrap_or_default(),
            counts,
        },
        price_schedule,
        original_schedule,
    }))
}

/// Sorted by term, lowest first.
fn parse_schedule(
    field: &'static str,
    raw: &[RawPriceSchedule],
) -> Result<Vec<PriceScheduleTerm>, NormalizeError> {
    let mut schedule = Vec::with_capacity(raw.len());
    for p in raw {
        schedule.push(PriceScheduleTerm {
            term: p.term.ok_or(NormalizeError::MissingField(field))?,
            price: to_e8(p.price.unwrap_or(0.0)),
            active: p.active.unwrap_or(false),
        });
    }
    schedule.sort_by_key(|t| t.term);
    Ok(schedule)
}

fn normalize_modification(m: &RawModification) -> Result<Modification, NormalizeError> {
    let mut parents = Vec::with_capacity(m.reserved_instances_ids.len());
    for p in &m.reserved_instances_ids {
        let raw = required("ReservedInstancesIds", &p.reserved_instances_id)?;
        parents.push(parse_id("ReservedInstancesIds", &raw)?);
    }

    // Results only carry an id once the provider has created them.
    let mut results = Vec::with_capacity(m.modification_results.len());
    for r in &m.modification_results {
        if let Some(raw) = r.reserved_instances_id.as_deref() {
            results.push(parse_id("ModificationResults", raw)?);
        }
    }

    Ok(Modification {
        parents,
        results,
        fulfilled: m.status.as_deref() == Some("fulfilled"),
    })
}

/// Splits `family.size` into the instance family and the normalization
/// units of one instance of that size.
pub fn instance_type_details(instance_type: &str) -> Result<(String, f64), NormalizeError> {
    let invalid = |reason: &str| NormalizeError::InvalidValue {
        field: "InstanceType",
        reason: format!("{reason}: '{instance_type}'"),
    };

    let (family, size) = instance_type
        .split_once('.')
        .ok_or_else(|| invalid("expected family.size"))?;
    if family.is_empty() {
        return Err(invalid("empty instance family"));
    }

    let units = match size {
        "nano" => 0.25,
        "micro" => 0.5,
        "small" => 1.0,
        "medium" => 2.0,
        "large" => 4.0,
        "xlarge" => 8.0,
        "metal" => 192.0,
        other => {
            let multiple = other
                .strip_suffix("xlarge")
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(|| invalid("unknown instance size"))?;
            8.0 * f64::from(multiple)
        }
    };

    Ok((family.to_string(), units))
}

fn parse_id(field: &'static str, raw: &str) -> Result<Uuid, NormalizeError> {
    Uuid::parse_str(raw.trim()).map_err(|_| NormalizeError::InvalidId {
        field,
        value: raw.to_string(),
    })
}

/// RFC 3339, or the provider's `YYYY-MM-DD HH:MM:SS` (UTC) form.
/// Sub-second precision is dropped: every boundary check is in seconds.
fn parse_date(field: &'static str, raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let invalid = || NormalizeError::InvalidDate {
        field,
        value: raw.to_string(),
    };

    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|_| invalid())?;

    DateTime::from_timestamp(parsed.timestamp(), 0).ok_or_else(invalid)
}

fn required(field: &'static str, value: &Option<String>) -> Result<String, NormalizeError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(NormalizeError::MissingField(field)),
    }
}
