//! One poll cycle of one region: normalize, resolve every family, derive
//! sell events, allocate listing terms, commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::logger::TraceId;
use tracing::{Instrument, info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcileSettings;
use crate::lineage::{FamilyView, resolve_family};
use crate::logger::{cycle_span, family_span, warn_if_slow};
use crate::metrics::{
    Counters, CycleObservations, ListingObservation, ReservationObservation, TermObservation,
};
use crate::model::{FamilyKey, LifecycleTag, ListingSnapshot, Reservation, TermWindow};
use crate::normalizer::{Modification, normalize};
use crate::provider::RawSnapshot;
use crate::sell_events::{SellEventOutcome, calculate, lineage_generations};
use crate::store::{LedgerRepository, ListingWrite};
use crate::terms::{Allocation, allocate};

const SLOW_STORE: Duration = Duration::from_millis(500);

/// Summary of one cycle. A second cycle over an identical snapshot
/// reports zero writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    pub region: String,
    pub reservations_seen: usize,
    pub records_skipped: usize,
    pub families_committed: usize,
    pub families_skipped: usize,
    pub reservations_written: usize,
    pub relations_written: usize,
    pub listings_written: usize,
    pub windows_written: usize,
    pub listings_deferred: usize,
    pub observations: CycleObservations,
}

impl CycleReport {
    pub fn writes(&self) -> usize {
        self.reservations_written
            + self.relations_written
            + self.listings_written
            + self.windows_written
    }
}

#[derive(Default)]
struct ListingOutcome {
    rows: ListingWrite,
    deferred: bool,
    windows: Vec<TermWindow>,
}

pub struct Reconciler {
    repo: Arc<dyn LedgerRepository>,
    settings: ReconcileSettings,
    counters: Counters,
}

impl Reconciler {
    pub fn new(repo: Arc<dyn LedgerRepository>, settings: ReconcileSettings, counters: Counters) -> Self {
        Self {
            repo,
            settings,
            counters,
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Runs a full cycle. Store failures abort the cycle; everything
    /// already committed stays committed and the next cycle starts over.
    pub async fn run_cycle(&self, raw: &RawSnapshot, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        Counters::add(&self.counters.cycles, 1);
        let span = cycle_span(&raw.region, &TraceId::new());

        let result = self.cycle(raw, now).instrument(span).await;
        match &result {
            Ok(report) => {
                Counters::add(&self.counters.records_skipped, report.records_skipped as u64);
                Counters::add(&self.counters.families_skipped, report.families_skipped as u64);
                Counters::add(&self.counters.listings_deferred, report.listings_deferred as u64);
                Counters::add(&self.counters.rows_written, report.writes() as u64);
            }
            Err(_) => Counters::add(&self.counters.cycles_failed, 1),
        }
        result
    }

    async fn cycle(&self, raw: &RawSnapshot, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let snapshot = normalize(raw, now).context("normalize snapshot")?;

        let mut report = CycleReport {
            region: snapshot.region.clone(),
            reservations_seen: snapshot.reservations.len(),
            records_skipped: snapshot.skipped,
            ..Default::default()
        };

        let current_ids: Vec<Uuid> = snapshot.reservations.iter().map(|r| r.id).collect();

        // Families never share members, so each one is resolved and
        // committed on its own.
        let mut families: BTreeMap<FamilyKey, Vec<Reservation>> = BTreeMap::new();
        for r in snapshot.reservations {
            families.entry(r.family_key()).or_default().push(r);
        }

        let mut views: HashMap<FamilyKey, FamilyView> = HashMap::with_capacity(families.len());
        let mut family_of: HashMap<Uuid, FamilyKey> = HashMap::new();

        for (key, members) in families {
            let ids: Vec<Uuid> = members.iter().map(|r| r.id).collect();
            let span = family_span(&key.to_string());

            match self
                .reconcile_family(&key, members, &snapshot.modifications, &mut report)
                .instrument(span)
                .await?
            {
                Some(view) => {
                    for id in ids {
                        family_of.insert(id, key.clone());
                    }
                    views.insert(key, view);
                }
                None => report.families_skipped += 1,
            }
        }

        let mut observations = CycleObservations {
            taken_at: Some(snapshot.taken_at),
            ..Default::default()
        };

        for snap in &snapshot.listings {
            let source = snap.listing.source_reservation_id;
            let view = family_of.get(&source).and_then(|k| views.get_mut(k));

            let outcome = self.reconcile_listing(snap, view).await?;

            if outcome.deferred {
                report.listings_deferred += 1;
            }
            if outcome.rows.listing.is_some() {
                report.listings_written += 1;
            }
            report.reservations_written += outcome.rows.reservations.len();
            report.windows_written += outcome.rows.windows.len() + outcome.rows.stale_windows.len();

            observations.listings.push(ListingObservation {
                listing_id: snap.listing.id,
                reservation_id: source,
                sold: snap.listing.counts.sold,
                active_term: snap.active_term().map(|t| t.term),
                deferred: outcome.deferred,
            });
            observations
                .terms
                .extend(outcome.windows.iter().map(|w| TermObservation {
                    listing_id: w.listing_id,
                    term: w.term,
                    start: w.start,
                    price: w.upfront_price,
                    units_sold: w.units_sold,
                }));
        }

        for id in &current_ids {
            let Some(r) = family_of
                .get(id)
                .and_then(|k| views.get(k))
                .and_then(|v| v.get(id))
            else {
                continue;
            };
            observations.reservations.push(ReservationObservation {
                reservation_id: r.id,
                lifecycle: r.lifecycle,
                pristine_expiration: r.original_end,
                count: r.count,
            });
        }
        report.observations = observations;

        info!(
            reservations = report.reservations_seen,
            families = report.families_committed,
            families_skipped = report.families_skipped,
            writes = report.writes(),
            listings_deferred = report.listings_deferred,
            "cycle reconciled"
        );

        Ok(report)
    }

    /// `Ok(None)` when the family's lineage graph cannot be walked; it is
    /// retried next cycle.
    async fn reconcile_family(
        &self,
        key: &FamilyKey,
        members: Vec<Reservation>,
        modifications: &[Modification],
        report: &mut CycleReport,
    ) -> anyhow::Result<Option<FamilyView>> {
        let stored = warn_if_slow("fetch_family", SLOW_STORE, self.repo.fetch_family(key))
            .await
            .with_context(|| format!("load family {key}"))?;

        let resolution = match resolve_family(stored, members, modifications, &self.settings) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "lineage walk failed; skipping family this cycle");
                return Ok(None);
            }
        };

        if !resolution.write.is_empty() {
            warn_if_slow("commit_family", SLOW_STORE, self.repo.commit_family(&resolution.write))
                .await
                .with_context(|| format!("commit family {key}"))?;
            report.families_committed += 1;
            report.reservations_written += resolution.write.reservations.len();
            report.relations_written += resolution.write.relations.len();
        }

        Ok(Some(resolution.view))
    }

    #[instrument(skip_all, fields(listing_id = %snap.listing.id))]
    async fn reconcile_listing(
        &self,
        snap: &ListingSnapshot,
        view: Option<&mut FamilyView>,
    ) -> anyhow::Result<ListingOutcome> {
        let listing = &snap.listing;
        let mut outcome = ListingOutcome::default();

        let stored_listing = self.repo.fetch_listing(&listing.id).await?;
        if stored_listing.as_ref() != Some(listing) {
            outcome.rows.listing = Some(listing.clone());
        }

        let stored_terms = self.repo.fetch_listing_terms(&listing.id).await?;
        outcome.windows = stored_terms.clone();

        match view {
            Some(view) => self.derive_terms(snap, view, &stored_terms, &mut outcome),
            None => {
                info!("source family not resolved this cycle; deferring terms");
                outcome.deferred = true;
            }
        }

        if !outcome.rows.is_empty() {
            warn_if_slow("commit_listing", SLOW_STORE, self.repo.commit_listing(&outcome.rows))
                .await
                .with_context(|| format!("commit listing {}", listing.id))?;
        }

        Ok(outcome)
    }

    fn derive_terms(
        &self,
        snap: &ListingSnapshot,
        view: &mut FamilyView,
        stored_terms: &[TermWindow],
        outcome: &mut ListingOutcome,
    ) {
        let listing = &snap.listing;
        let source = listing.source_reservation_id;

        let Some(pristine) = view.get(&source).and_then(|r| r.original_end) else {
            info!("pristine expiration unknown; deferring terms");
            outcome.deferred = true;
            return;
        };

        let sell = match lineage_generations(view, &source, &listing.id, self.settings.max_walk_steps) {
            Ok(generations) => calculate(
                listing.id,
                &generations,
                pristine,
                listing.counts.sold,
                &self.settings,
            ),
            Err(e) => {
                warn!(error = %e, "lineage walk failed; deferring terms");
                outcome.deferred = true;
                return;
            }
        };

        let (events, fully_sold) = match sell {
            SellEventOutcome::Reconciled { events, fully_sold } => (events, fully_sold),
            SellEventOutcome::Deferred { derived, reported } => {
                info!(derived, reported, "sold units disagree with provider; deferring terms");
                outcome.deferred = true;
                return;
            }
        };

        if let Some(id) = fully_sold {
            if let Some(r) = view.get_mut(&id) {
                let tagged = r.lifecycle.observe(LifecycleTag::Sold);
                if tagged != r.lifecycle {
                    r.lifecycle = tagged;
                    outcome.rows.reservations.push(r.clone());
                }
            }
        }

        match allocate(
            listing.id,
            listing.published,
            pristine,
            snap.allocation_schedule(),
            &events,
            &self.settings,
        ) {
            Allocation::Windows(windows) => {
                let stored: HashMap<DateTime<Utc>, &TermWindow> =
                    stored_terms.iter().map(|w| (w.start, w)).collect();

                let windows: Vec<TermWindow> =
                    windows.into_iter().filter(|w| !w.is_empty()).collect();
                outcome.rows.windows = windows
                    .iter()
                    .filter(|w| stored.get(&w.start).copied() != Some(*w))
                    .cloned()
                    .collect();
                // A moved pristine expiration shifts every window start.
                outcome.rows.stale_windows = stored_terms
                    .iter()
                    .filter(|s| !windows.iter().any(|w| w.start == s.start))
                    .cloned()
                    .collect();
                outcome.windows = windows;
            }
            Allocation::Deferred { expected, actual } => {
                info!(expected, actual, "price schedule does not fit pristine expiration; deferring terms");
                outcome.deferred = true;
            }
        }
    }
}
