//! Lifecycle classification and lineage inference for one family.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::ReconcileSettings;
use crate::error::GraphError;
use crate::lineage::FamilyView;
use crate::logger::annotate_reservation;
use crate::model::{LifecycleTag, Relation, Reservation};
use crate::normalizer::Modification;
use crate::store::{FamilyRecords, FamilyWrite};

/// Resolved state of a family plus the rows that differ from what the
/// store held before.
#[derive(Debug)]
pub struct FamilyResolution {
    pub view: FamilyView,
    pub write: FamilyWrite,
}

/// Merges this cycle's records of one family into its stored state,
/// classifies every current reservation and recomputes pristine
/// expirations. Fails only when a graph walk fails, in which case the
/// family is left untouched for this cycle.
pub fn resolve_family(
    stored: FamilyRecords,
    current: Vec<Reservation>,
    modifications: &[Modification],
    settings: &ReconcileSettings,
) -> Result<FamilyResolution, GraphError> {
    let baseline: HashMap<Uuid, Reservation> = stored
        .reservations
        .iter()
        .map(|r| (r.id, r.clone()))
        .collect();
    let known_edges: HashSet<Relation> = stored.relations.iter().copied().collect();

    let mut view = FamilyView::new(stored.reservations, &stored.relations);

    let mut order = Vec::with_capacity(current.len());
    for mut r in current {
        if let Some(prev) = baseline.get(&r.id) {
            r.lifecycle = r.lifecycle.merge(prev.lifecycle);
            r.original_end = prev.original_end;
            r.absorb_listings(&prev.listed_on);
        }
        order.push(r.id);
        view.upsert_node(r);
    }

    let authoritative = apply_modifications(&mut view, modifications);

    for id in &order {
        if authoritative.contains(id) {
            continue;
        }
        annotate_reservation(id);
        classify(&mut view, id, baseline.contains_key(id), settings);
    }

    assign_pristine_expirations(&mut view, settings)?;

    let mut reservations: Vec<Reservation> = view
        .nodes()
        .filter(|r| baseline.get(&r.id) != Some(*r))
        .cloned()
        .collect();
    reservations.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));

    let relations: Vec<Relation> = view
        .relations()
        .filter(|rel| !known_edges.contains(rel))
        .collect();

    Ok(FamilyResolution {
        view,
        write: FamilyWrite {
            reservations,
            relations,
        },
    })
}

/// Fulfilled modification events are authoritative: every parent is
/// linked to every result and both ends become `converted`. Returns the
/// ids they touched.
fn apply_modifications(view: &mut FamilyView, modifications: &[Modification]) -> HashSet<Uuid> {
    let mut touched = HashSet::new();

    for m in modifications.iter().filter(|m| m.fulfilled) {
        for parent in &m.parents {
            for child in &m.results {
                if !view.contains(parent) || !view.contains(child) {
                    trace!(%parent, %child, "modification endpoint outside family");
                    continue;
                }
                view.add_edge(Relation::new(*parent, *child));
                for id in [parent, child] {
                    tag(view, id, LifecycleTag::Converted);
                    touched.insert(*id);
                }
            }
        }
    }

    touched
}

fn classify(view: &mut FamilyView, id: &Uuid, known: bool, settings: &ReconcileSettings) {
    let offset = settings.boundary_offset;
    let Some(r) = view.get(id) else {
        return;
    };
    let (start, end, upfront) = (r.start, r.end, r.upfront_price);

    if r.full_term_end(offset) == end {
        tag(view, id, LifecycleTag::Unchanged);
        return;
    }

    // A sale carves the remaining units into a new reservation starting
    // right after the old one ends, at the same upfront price.
    let splits = matching(view, id, |m| m.start == end + offset && m.upfront_price == upfront);
    if !splits.is_empty() {
        debug!(reservation_id = %id, descendants = splits.len(), "sell split");
        link(view, id, &splits, LifecycleTag::SellSplitted);
        return;
    }

    let conversions = matching(view, id, |m| m.start == end);
    if !conversions.is_empty() {
        debug!(reservation_id = %id, descendants = conversions.len(), "conversion");
        link(view, id, &conversions, LifecycleTag::Converted);
        return;
    }

    if start + offset == end {
        tag(view, id, LifecycleTag::Canceled);
        return;
    }

    if !known {
        tag(view, id, LifecycleTag::Unknown);
    }
}

fn matching<F>(view: &FamilyView, id: &Uuid, pred: F) -> Vec<Uuid>
where
    F: Fn(&Reservation) -> bool,
{
    let mut ids: Vec<Uuid> = view
        .nodes()
        .filter(|m| m.id != *id && pred(m))
        .map(|m| m.id)
        .collect();
    ids.sort();
    ids
}

fn link(view: &mut FamilyView, parent: &Uuid, children: &[Uuid], how: LifecycleTag) {
    tag(view, parent, how);
    for child in children {
        view.add_edge(Relation::new(*parent, *child));
        tag(view, child, how);
    }
}

fn tag(view: &mut FamilyView, id: &Uuid, t: LifecycleTag) {
    if let Some(r) = view.get_mut(id) {
        r.lifecycle = r.lifecycle.observe(t);
    }
}

/// Values are computed against the view as loaded, then applied, so a
/// freshly raised bound propagates to the rest of the tree next cycle.
fn assign_pristine_expirations(
    view: &mut FamilyView,
    settings: &ReconcileSettings,
) -> Result<(), GraphError> {
    let cap = settings.max_walk_steps;
    let mut by_root: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    let mut computed = Vec::with_capacity(view.len());

    let ids: Vec<Uuid> = view.nodes().map(|r| r.id).collect();
    for id in ids {
        let root = view.oldest_ancestor(&id, cap)?;
        let pristine = match by_root.get(&root) {
            Some(p) => *p,
            None => {
                let p = view.pristine_expiration(&root, settings.boundary_offset, cap)?;
                by_root.insert(root, p);
                p
            }
        };
        computed.push((id, pristine));
    }

    for (id, pristine) in computed {
        if let Some(r) = view.get_mut(&id) {
            r.original_end = Some(pristine);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Lifecycle;
    use crate::model::reservation::fixtures::*;
    use chrono::TimeDelta;

    fn settings() -> ReconcileSettings {
        ReconcileSettings::default()
    }

    /// Stored state after `write` has been committed on top of `stored`.
    fn committed(stored: FamilyRecords, write: &FamilyWrite) -> FamilyRecords {
        let mut by_id: HashMap<Uuid, Reservation> =
            stored.reservations.into_iter().map(|r| (r.id, r)).collect();
        for r in &write.reservations {
            by_id.insert(r.id, r.clone());
        }
        let mut relations = stored.relations;
        relations.extend(write.relations.iter().copied());
        FamilyRecords {
            reservations: by_id.into_values().collect(),
            relations,
        }
    }

    fn resolve(stored: FamilyRecords, current: Vec<Reservation>) -> FamilyResolution {
        resolve_family(stored, current, &[], &settings()).unwrap()
    }

    fn tags(res: &FamilyResolution, id: &Uuid) -> Lifecycle {
        res.view.get(id).unwrap().lifecycle
    }

    #[test]
    fn full_term_reservation_is_unchanged() {
        let r = reservation(10, t0());
        let res = resolve(FamilyRecords::default(), vec![r.clone()]);

        assert_eq!(tags(&res, &r.id), Lifecycle::only(LifecycleTag::Unchanged));
        assert_eq!(res.write.reservations.len(), 1);
        assert_eq!(res.write.reservations[0].original_end, Some(r.end));
        assert!(res.write.relations.is_empty());
    }

    #[test]
    fn simple_sale_tags_parent_and_child() {
        let r = reservation(10, t0());
        let cycle1 = resolve(FamilyRecords::default(), vec![r.clone()]);
        let stored = committed(FamilyRecords::default(), &cycle1.write);

        let mut shrunk = r.clone();
        shrunk.end = r.end - TimeDelta::days(100);
        let mut child = reservation(7, shrunk.end + TimeDelta::seconds(1));
        child.end = r.end;

        let cycle2 = resolve(stored, vec![shrunk.clone(), child.clone()]);
        let sold = Lifecycle::only(LifecycleTag::SellSplitted);
        assert_eq!(tags(&cycle2, &r.id), sold);
        assert_eq!(tags(&cycle2, &child.id), sold);
        assert_eq!(cycle2.write.relations, vec![Relation::new(r.id, child.id)]);
        for id in [r.id, child.id] {
            assert_eq!(cycle2.view.get(&id).unwrap().original_end, Some(r.end));
        }
    }

    #[test]
    fn conversion_has_no_gap() {
        let mut r = reservation(4, t0());
        r.end = t0() + TimeDelta::days(90);
        let mut child = reservation(4, r.end);
        child.end = t0() + TimeDelta::seconds(ONE_YEAR - 1);

        let res = resolve(FamilyRecords::default(), vec![r.clone(), child.clone()]);
        assert_eq!(tags(&res, &r.id), Lifecycle::only(LifecycleTag::Converted));
        assert_eq!(tags(&res, &child.id), Lifecycle::only(LifecycleTag::Converted));
    }

    #[test]
    fn one_second_reservation_is_canceled() {
        let mut r = reservation(3, t0());
        r.end = t0() + TimeDelta::seconds(1);

        let res = resolve(FamilyRecords::default(), vec![r.clone()]);
        assert_eq!(tags(&res, &r.id), Lifecycle::only(LifecycleTag::Canceled));
        assert!(res.write.relations.is_empty());
    }

    #[test]
    fn sell_split_wins_over_conversion() {
        let mut r = reservation(10, t0());
        r.end = t0() + TimeDelta::days(50);
        let mut split = reservation(7, r.end + TimeDelta::seconds(1));
        split.end = t0() + TimeDelta::seconds(ONE_YEAR - 1);
        let mut converted = reservation(3, r.end);
        converted.end = split.end;

        let res = resolve(
            FamilyRecords::default(),
            vec![r.clone(), split.clone(), converted.clone()],
        );
        assert_eq!(tags(&res, &r.id), Lifecycle::only(LifecycleTag::SellSplitted));
        assert_eq!(res.write.relations, vec![Relation::new(r.id, split.id)]);
        assert!(!tags(&res, &converted.id).contains(LifecycleTag::Converted));
    }

    #[test]
    fn unexplained_reservation_is_unknown_then_carried_forward() {
        let mut r = reservation(5, t0());
        r.end = t0() + TimeDelta::days(200);

        let first = resolve(FamilyRecords::default(), vec![r.clone()]);
        assert_eq!(tags(&first, &r.id), Lifecycle::only(LifecycleTag::Unknown));

        let mut stored = committed(FamilyRecords::default(), &first.write);
        stored.reservations[0].lifecycle = Lifecycle::only(LifecycleTag::Sold);

        let second = resolve(stored, vec![r.clone()]);
        assert_eq!(tags(&second, &r.id), Lifecycle::only(LifecycleTag::Sold));
        assert!(second.write.reservations.is_empty());
    }

    #[test]
    fn fulfilled_modification_is_authoritative() {
        let parent = reservation(4, t0());
        let child = reservation(2, t0() + TimeDelta::days(3));
        let pending = Modification {
            parents: vec![parent.id],
            results: vec![child.id],
            fulfilled: false,
        };
        let fulfilled = Modification {
            fulfilled: true,
            ..pending.clone()
        };

        let res = resolve_family(
            FamilyRecords::default(),
            vec![parent.clone(), child.clone()],
            &[pending, fulfilled],
            &settings(),
        )
        .unwrap();

        // The parent still runs its full term, yet the event wins.
        assert_eq!(tags(&res, &parent.id), Lifecycle::only(LifecycleTag::Converted));
        assert_eq!(tags(&res, &child.id), Lifecycle::only(LifecycleTag::Converted));
        assert_eq!(res.write.relations, vec![Relation::new(parent.id, child.id)]);
        assert_eq!(res.view.get(&child.id).unwrap().original_end, Some(parent.end));
    }

    #[test]
    fn second_identical_pass_writes_nothing() {
        let r = reservation(10, t0());
        let mut shrunk = r.clone();
        shrunk.end = r.end - TimeDelta::days(10);
        let mut child = reservation(6, shrunk.end + TimeDelta::seconds(1));
        child.end = r.end;
        let current = vec![shrunk, child];

        let first = resolve(FamilyRecords::default(), current.clone());
        let stored = committed(FamilyRecords::default(), &first.write);
        let second = resolve(stored, current);

        assert!(second.write.reservations.is_empty());
        assert!(second.write.relations.is_empty());
    }

    #[test]
    fn corrupted_graph_fails_the_family() {
        let a = reservation(1, t0());
        let b = reservation(1, t0() + TimeDelta::days(1));
        let stored = FamilyRecords {
            reservations: vec![a.clone(), b.clone()],
            relations: vec![Relation::new(a.id, b.id), Relation::new(b.id, a.id)],
        };

        let err = resolve_family(stored, vec![a], &[], &settings()).unwrap_err();
        assert!(matches!(err, GraphError::WalkLimitExceeded { .. }));
    }
}
