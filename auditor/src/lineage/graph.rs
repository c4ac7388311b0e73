//! In-memory adjacency view of one reservation family. Every walk is a
//! pure function over this view and is bounded by `max_walk_steps`.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::error::GraphError;
use crate::model::{Relation, Reservation};

#[derive(Clone, Debug, Default)]
pub struct FamilyView {
    nodes: HashMap<Uuid, Reservation>,
    parents: HashMap<Uuid, BTreeSet<Uuid>>,
    children: HashMap<Uuid, BTreeSet<Uuid>>,
}

impl FamilyView {
    pub fn new(reservations: impl IntoIterator<Item = Reservation>, relations: &[Relation]) -> Self {
        let mut view = Self {
            nodes: reservations.into_iter().map(|r| (r.id, r)).collect(),
            ..Default::default()
        };
        for rel in relations {
            view.add_edge(*rel);
        }
        view
    }

    /// Returns false if the edge was already known.
    pub fn add_edge(&mut self, rel: Relation) -> bool {
        let fresh = self
            .children
            .entry(rel.parent_id)
            .or_default()
            .insert(rel.child_id);
        self.parents
            .entry(rel.child_id)
            .or_default()
            .insert(rel.parent_id);
        fresh
    }

    pub fn upsert_node(&mut self, reservation: Reservation) {
        self.nodes.insert(reservation.id, reservation);
    }

    pub fn get(&self, id: &Uuid) -> Option<&Reservation> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Reservation> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Reservation> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children_of(&self, id: &Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.children.get(id).into_iter().flatten().copied()
    }

    pub fn parents_of(&self, id: &Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.parents.get(id).into_iter().flatten().copied()
    }

    /// All edges, ordered by (parent, child).
    pub fn relations(&self) -> impl Iterator<Item = Relation> + '_ {
        let mut parents: Vec<_> = self.children.keys().collect();
        parents.sort();
        parents.into_iter().flat_map(move |p| {
            self.children[p].iter().map(move |c| Relation::new(*p, *c))
        })
    }

    fn node(&self, id: &Uuid) -> Result<&Reservation, GraphError> {
        self.nodes.get(id).ok_or(GraphError::MissingNode(*id))
    }

    /// Walks parent links up to a node without parents. Where a node has
    /// several parents (a merge), the one that started first is followed.
    pub fn oldest_ancestor(&self, id: &Uuid, cap: usize) -> Result<Uuid, GraphError> {
        let mut current = self.node(id)?.id;

        for _ in 0..=cap {
            let mut oldest: Option<&Reservation> = None;
            for p in self.parents_of(&current) {
                let parent = self.node(&p)?;
                if oldest.is_none_or(|o| (parent.start, parent.id) < (o.start, o.id)) {
                    oldest = Some(parent);
                }
            }
            match oldest {
                Some(parent) => current = parent.id,
                None => return Ok(current),
            }
        }

        Err(GraphError::WalkLimitExceeded {
            start: *id,
            cap,
        })
    }

    /// Every node reachable through child links, excluding `id` itself,
    /// in depth-first order.
    pub fn descendants(&self, id: &Uuid, cap: usize) -> Result<Vec<Uuid>, GraphError> {
        self.walk_down(id, cap, |_| true)
    }

    /// Like `descendants`, but only expands nodes accepted by `follow`.
    /// Rejected children are still returned, their subtrees are not.
    pub fn walk_down<F>(&self, id: &Uuid, cap: usize, follow: F) -> Result<Vec<Uuid>, GraphError>
    where
        F: Fn(&Reservation) -> bool,
    {
        let mut seen = HashSet::from([*id]);
        let mut stack = vec![(*id, 0usize)];
        let mut out = Vec::new();

        while let Some((current, depth)) = stack.pop() {
            // The cap bounds generations, not family width.
            if depth > cap {
                return Err(GraphError::WalkLimitExceeded { start: *id, cap });
            }
            for child in self.children_of(&current) {
                if !seen.insert(child) {
                    continue;
                }
                let node = self.node(&child)?;
                out.push(child);
                if follow(node) {
                    stack.push((child, depth + 1));
                }
            }
        }

        Ok(out)
    }

    /// Among `id` and its descendants, the childless node that ends first.
    pub fn earliest_ending_leaf(&self, id: &Uuid, cap: usize) -> Result<Uuid, GraphError> {
        let mut best = None::<&Reservation>;
        let candidates = std::iter::once(*id).chain(self.descendants(id, cap)?);

        for candidate in candidates {
            if self.children_of(&candidate).next().is_some() {
                continue;
            }
            let node = self.node(&candidate)?;
            if best.is_none_or(|b| (node.end, node.id) < (b.end, b.id)) {
                best = Some(node);
            }
        }

        // A tree always has a leaf unless the walk looped back on itself.
        best.map(|b| b.id).ok_or(GraphError::WalkLimitExceeded {
            start: *id,
            cap,
        })
    }

    /// End date the family of `id` would reach if nothing had been sold:
    /// the root's start plus the shared duration, unless the earliest
    /// ending leaf already recorded a later value.
    pub fn pristine_expiration(
        &self,
        id: &Uuid,
        boundary_offset: TimeDelta,
        cap: usize,
    ) -> Result<DateTime<Utc>, GraphError> {
        let root = self.node(&self.oldest_ancestor(id, cap)?)?;
        let from_root = root.full_term_end(boundary_offset);

        // A leaf whose recorded value equals its own full-term end was last
        // resolved as a root of its own and tells nothing about the family.
        let leaf = self.node(&self.earliest_ending_leaf(&root.id, cap)?)?;
        Ok(match leaf.original_end {
            Some(recorded)
                if recorded > from_root && recorded != leaf.full_term_end(boundary_offset) =>
            {
                recorded
            }
            _ => from_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reservation::fixtures::*;

    const CAP: usize = 16;

    fn chain() -> (FamilyView, Vec<Uuid>) {
        let root = reservation(10, t0());
        let mid = reservation(7, t0() + TimeDelta::days(30));
        let leaf = reservation(5, t0() + TimeDelta::days(60));
        let ids = vec![root.id, mid.id, leaf.id];
        let view = FamilyView::new(
            vec![root, mid, leaf],
            &[Relation::new(ids[0], ids[1]), Relation::new(ids[1], ids[2])],
        );
        (view, ids)
    }

    #[test]
    fn oldest_ancestor_walks_to_root() {
        let (view, ids) = chain();
        assert_eq!(view.oldest_ancestor(&ids[2], CAP), Ok(ids[0]));
        assert_eq!(view.oldest_ancestor(&ids[0], CAP), Ok(ids[0]));
    }

    #[test]
    fn merge_follows_earliest_starting_parent() {
        let older = reservation(2, t0());
        let younger = reservation(2, t0() + TimeDelta::days(10));
        let merged = reservation(4, t0() + TimeDelta::days(20));
        let view = FamilyView::new(
            vec![older.clone(), younger.clone(), merged.clone()],
            &[
                Relation::new(younger.id, merged.id),
                Relation::new(older.id, merged.id),
            ],
        );
        assert_eq!(view.oldest_ancestor(&merged.id, CAP), Ok(older.id));
    }

    #[test]
    fn cycles_hit_the_walk_cap() {
        let (mut view, ids) = chain();
        view.add_edge(Relation::new(ids[2], ids[0]));

        assert_eq!(
            view.oldest_ancestor(&ids[1], CAP),
            Err(GraphError::WalkLimitExceeded {
                start: ids[1],
                cap: CAP
            })
        );
    }

    #[test]
    fn dangling_parent_is_reported() {
        let (mut view, ids) = chain();
        let ghost = Uuid::new_v4();
        view.add_edge(Relation::new(ghost, ids[0]));
        assert_eq!(
            view.oldest_ancestor(&ids[2], CAP),
            Err(GraphError::MissingNode(ghost))
        );
    }

    #[test]
    fn descendants_and_leaf() {
        let (view, ids) = chain();
        assert_eq!(view.descendants(&ids[0], CAP).unwrap(), vec![ids[1], ids[2]]);
        assert_eq!(view.earliest_ending_leaf(&ids[0], CAP), Ok(ids[2]));
        assert!(view.descendants(&ids[2], CAP).unwrap().is_empty());
    }

    #[test]
    fn wide_fan_out_is_not_limited_by_the_cap() {
        let parent = reservation(70, t0());
        let children: Vec<_> = (0..70)
            .map(|i| reservation(1, t0() + TimeDelta::days(30) + TimeDelta::seconds(i)))
            .collect();
        let relations: Vec<_> = children
            .iter()
            .map(|c| Relation::new(parent.id, c.id))
            .collect();
        let first = children[0].id;
        let view = FamilyView::new(std::iter::once(parent.clone()).chain(children), &relations);

        assert_eq!(view.descendants(&parent.id, CAP).unwrap().len(), 70);
        assert_eq!(view.earliest_ending_leaf(&parent.id, CAP), Ok(first));
        assert!(view.pristine_expiration(&first, TimeDelta::seconds(1), CAP).is_ok());
    }

    #[test]
    fn deep_chain_hits_the_walk_cap() {
        let nodes: Vec<_> = (0..=CAP as i64 + 2)
            .map(|i| reservation(1, t0() + TimeDelta::days(i)))
            .collect();
        let relations: Vec<_> = nodes
            .windows(2)
            .map(|w| Relation::new(w[0].id, w[1].id))
            .collect();
        let root = nodes[0].id;
        let view = FamilyView::new(nodes, &relations);

        assert_eq!(
            view.descendants(&root, CAP),
            Err(GraphError::WalkLimitExceeded { start: root, cap: CAP })
        );
    }

    #[test]
    fn walk_down_stops_at_rejected_nodes() {
        let (view, ids) = chain();
        let reached = view.walk_down(&ids[0], CAP, |r| r.count > 7).unwrap();
        assert_eq!(reached, vec![ids[1]]);
    }

    #[test]
    fn pristine_expiration_prefers_later_recorded_value() {
        let (mut view, ids) = chain();
        let offset = TimeDelta::seconds(1);
        let root_end = t0() + TimeDelta::seconds(ONE_YEAR - 1);

        assert_eq!(view.pristine_expiration(&ids[1], offset, CAP), Ok(root_end));

        let later = root_end + TimeDelta::days(2);
        view.get_mut(&ids[2]).unwrap().original_end = Some(later);
        assert_eq!(view.pristine_expiration(&ids[1], offset, CAP), Ok(later));

        view.get_mut(&ids[2]).unwrap().original_end = Some(root_end - TimeDelta::days(2));
        assert_eq!(view.pristine_expiration(&ids[1], offset, CAP), Ok(root_end));
    }

    #[test]
    fn self_derived_leaf_value_is_ignored() {
        let (mut view, ids) = chain();
        let offset = TimeDelta::seconds(1);
        let leaf = view.get_mut(&ids[2]).unwrap();
        leaf.original_end = Some(leaf.full_term_end(offset));

        assert_eq!(
            view.pristine_expiration(&ids[0], offset, CAP),
            Ok(t0() + TimeDelta::seconds(ONE_YEAR - 1))
        );
    }

    #[test]
    fn relations_are_sorted_and_deduplicated() {
        let (mut view, ids) = chain();
        assert!(!view.add_edge(Relation::new(ids[0], ids[1])));
        assert_eq!(view.relations().count(), 2);
    }
}
