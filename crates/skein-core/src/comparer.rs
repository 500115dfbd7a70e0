//! Total ordering of fragments derived from their link graph.
//!
//! Fragments are discovered out of chronological order (backward pagination
//! keeps finding older history after the live fragment exists), so their ids
//! cannot be used as sort keys. Instead every fragment gets a *rank* within
//! its *chain* (a maximal run of linked fragments):
//!
//! - a fragment appended after a chain's tail gets `tail + RANK_STRIDE`,
//!   one prepended before the head gets `head - RANK_STRIDE`;
//! - a fragment spliced between two neighbours takes the midpoint, and only
//!   when no integer is left between them is that chain renumbered;
//! - when two chains are linked, the smaller one is shifted into the rank
//!   space of the larger one.
//!
//! All updates run under a single write lock, so readers see either the old
//! or the new rank table, never a mix.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::model::{Direction, Fragment, FragmentId};

/// Distance between ranks of adjacent fragments when a chain is (re)numbered.
pub const RANK_STRIDE: i64 = 1 << 20;

/// Two positions cannot be ordered against each other.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnorderableError {
    #[error("fragment {0} is not registered with the comparer")]
    UnknownFragment(FragmentId),

    #[error("fragments {a} and {b} belong to chains with no known link between them")]
    DisjointChains { a: FragmentId, b: FragmentId },
}

type ChainId = u64;

#[derive(Debug, Clone, Copy)]
struct Node {
    previous: Option<FragmentId>,
    next: Option<FragmentId>,
    chain: ChainId,
    rank: i64,
}

#[derive(Debug, Default)]
struct RankTable {
    nodes: HashMap<FragmentId, Node>,
    chain_len: HashMap<ChainId, usize>,
    next_chain: ChainId,
}

impl RankTable {
    fn new_chain(&mut self) -> ChainId {
        let chain = self.next_chain;
        self.next_chain += 1;
        chain
    }

    fn len_of(&self, chain: ChainId) -> usize {
        self.chain_len.get(&chain).copied().unwrap_or(0)
    }

    fn move_member(&mut self, from: ChainId, to: ChainId) {
        if from == to {
            return;
        }
        if let Some(len) = self.chain_len.get_mut(&from) {
            *len = len.saturating_sub(1);
            if *len == 0 {
                self.chain_len.remove(&from);
            }
        }
        *self.chain_len.entry(to).or_default() += 1;
    }

    fn insert_node(&mut self, id: FragmentId, node: Node) {
        *self.chain_len.entry(node.chain).or_default() += 1;
        self.nodes.insert(id, node);
    }

    fn add(&mut self, id: FragmentId, previous: Option<FragmentId>, next: Option<FragmentId>) {
        if self.nodes.contains_key(&id) {
            self.relink(id, previous, next);
        } else {
            self.place_new(id, previous, next);
        }
    }

    fn place_new(&mut self, id: FragmentId, previous: Option<FragmentId>, next: Option<FragmentId>) {
        let prev = previous.and_then(|p| self.nodes.get(&p).copied());
        let succ = next.and_then(|n| self.nodes.get(&n).copied());

        let (chain, rank, needs_rebalance) = match (prev, succ) {
            (Some(p), Some(n)) if p.chain == n.chain => {
                let room = n.rank - p.rank;
                if room >= 2 {
                    (p.chain, p.rank + room / 2, false)
                } else {
                    (p.chain, p.rank, true)
                }
            }
            (Some(p), _) => (
                p.chain,
                p.rank + RANK_STRIDE,
                p.next.is_some_and(|other| other != id),
            ),
            (None, Some(n)) => (
                n.chain,
                n.rank - RANK_STRIDE,
                n.previous.is_some_and(|other| other != id),
            ),
            (None, None) => (self.new_chain(), 0, false),
        };

        self.insert_node(
            id,
            Node {
                previous,
                next,
                chain,
                rank,
            },
        );
        if let Some(p) = previous.and_then(|p| self.nodes.get_mut(&p)) {
            p.next = Some(id);
        }
        if let Some(n) = next.and_then(|n| self.nodes.get_mut(&n)) {
            n.previous = Some(id);
        }

        if needs_rebalance {
            self.rebalance(id);
        }
        if let (Some(next_id), Some(n)) = (next, succ)
            && n.chain != chain
        {
            self.merge(id, next_id);
        }
    }

    fn relink(&mut self, id: FragmentId, previous: Option<FragmentId>, next: Option<FragmentId>) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let old_previous = node.previous;
        let old_next = node.next;
        node.previous = previous;
        node.next = next;

        if let Some(next_id) = next
            && old_next != next
            && let Some(n) = self.nodes.get_mut(&next_id)
        {
            n.previous = Some(id);
            self.merge(id, next_id);
        }
        if let Some(prev_id) = previous
            && old_previous != previous
            && let Some(p) = self.nodes.get_mut(&prev_id)
        {
            p.next = Some(id);
            self.merge(prev_id, id);
        }
    }

    /// Join the chain ending at `left` with the chain starting at `right`.
    fn merge(&mut self, left: FragmentId, right: FragmentId) {
        let (Some(l), Some(r)) = (
            self.nodes.get(&left).copied(),
            self.nodes.get(&right).copied(),
        ) else {
            return;
        };
        if l.chain == r.chain {
            if l.rank >= r.rank {
                self.rebalance(left);
            }
            return;
        }

        let (left_len, right_len) = (self.len_of(l.chain), self.len_of(r.chain));
        let (moved_chain, kept_chain) = if right_len <= left_len {
            let offset = l.rank + RANK_STRIDE - r.rank;
            self.shift_chain(right, Direction::Forward, offset, l.chain);
            (r.chain, l.chain)
        } else {
            let offset = r.rank - RANK_STRIDE - l.rank;
            self.shift_chain(left, Direction::Backward, offset, r.chain);
            (l.chain, r.chain)
        };

        // `left` was not the tail (or `right` not the head) of its chain;
        // fall back to renumbering the whole connected run.
        if self.len_of(moved_chain) > 0 {
            self.rebalance(left);
        }

        info!(
            left = %left,
            right = %right,
            size = self.len_of(kept_chain),
            "merged fragment chains"
        );
    }

    fn shift_chain(&mut self, start: FragmentId, walk: Direction, offset: i64, target: ChainId) {
        let Some(from) = self.nodes.get(&start).map(|n| n.chain) else {
            return;
        };
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            if node.chain != from {
                break;
            }
            node.rank += offset;
            node.chain = target;
            cursor = match walk {
                Direction::Forward => node.next,
                Direction::Backward => node.previous,
            };
            self.move_member(from, target);
        }
    }

    /// Renumber every fragment connected to `member` with fresh strides.
    fn rebalance(&mut self, member: FragmentId) {
        let Some(chain) = self.nodes.get(&member).map(|n| n.chain) else {
            return;
        };

        let mut head = member;
        let mut seen = HashSet::from([member]);
        while let Some(prev) = self.nodes.get(&head).and_then(|n| n.previous) {
            if !self.nodes.contains_key(&prev) || !seen.insert(prev) {
                break;
            }
            head = prev;
        }

        let mut visited = HashSet::new();
        let mut cursor = Some(head);
        let mut rank = 0_i64;
        while let Some(id) = cursor {
            if !visited.insert(id) {
                break;
            }
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            let old_chain = node.chain;
            node.chain = chain;
            node.rank = rank;
            rank += RANK_STRIDE;
            cursor = node.next;
            self.move_member(old_chain, chain);
        }

        debug!(fragment = %member, size = visited.len(), "rebalanced fragment ranks");
    }
}

/// Ordering oracle for the fragments of one room.
#[derive(Debug, Default)]
pub struct FragmentIdComparer {
    table: RwLock<RankTable>,
}

impl FragmentIdComparer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a comparer from every stored fragment of a room.
    #[must_use]
    pub fn from_fragments(fragments: &[Fragment]) -> Self {
        let mut table = RankTable::default();
        for fragment in fragments {
            let chain = table.new_chain();
            table.insert_node(
                fragment.id,
                Node {
                    previous: fragment.previous_id(),
                    next: fragment.next_id(),
                    chain,
                    rank: 0,
                },
            );
        }

        let heads: Vec<FragmentId> = fragments
            .iter()
            .filter(|f| {
                f.previous_id()
                    .is_none_or(|prev| !table.nodes.contains_key(&prev))
            })
            .map(|f| f.id)
            .collect();
        for head in heads {
            table.rebalance(head);
        }

        Self {
            table: RwLock::new(table),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RankTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RankTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly created fragment, or one whose links changed.
    pub fn add_fragment(&self, fragment: &Fragment) {
        self.write()
            .add(fragment.id, fragment.previous_id(), fragment.next_id());
    }

    /// Order two `(fragment, index)` positions.
    ///
    /// Returns `Equal` only for identical positions.
    ///
    /// # Errors
    ///
    /// Returns [`UnorderableError`] if either fragment is unknown or the two
    /// fragments sit in chains that have not been linked.
    pub fn compare_positions(
        &self,
        a: (FragmentId, i64),
        b: (FragmentId, i64),
    ) -> Result<Ordering, UnorderableError> {
        if a.0 == b.0 {
            return Ok(a.1.cmp(&b.1));
        }
        self.compare_fragments(a.0, b.0)
    }

    /// Order two fragments by rank.
    ///
    /// # Errors
    ///
    /// Same as [`Self::compare_positions`].
    pub fn compare_fragments(
        &self,
        a: FragmentId,
        b: FragmentId,
    ) -> Result<Ordering, UnorderableError> {
        if a == b {
            return Ok(Ordering::Equal);
        }
        let table = self.read();
        let left = table
            .nodes
            .get(&a)
            .ok_or(UnorderableError::UnknownFragment(a))?;
        let right = table
            .nodes
            .get(&b)
            .ok_or(UnorderableError::UnknownFragment(b))?;
        if left.chain != right.chain {
            return Err(UnorderableError::DisjointChains { a, b });
        }
        Ok(left.rank.cmp(&right.rank))
    }

    /// Whether both fragments are known and in the same chain.
    #[must_use]
    pub fn are_connected(&self, a: FragmentId, b: FragmentId) -> bool {
        let table = self.read();
        match (table.nodes.get(&a), table.nodes.get(&b)) {
            (Some(left), Some(right)) => left.chain == right.chain,
            _ => false,
        }
    }

    #[must_use]
    pub fn rank(&self, id: FragmentId) -> Option<i64> {
        self.read().nodes.get(&id).map(|n| n.rank)
    }

    #[must_use]
    pub fn contains(&self, id: FragmentId) -> bool {
        self.read().nodes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Fragments of the chain containing `id`, oldest first.
    #[must_use]
    pub fn chain(&self, id: FragmentId) -> Vec<FragmentId> {
        let table = self.read();
        let Some(chain) = table.nodes.get(&id).map(|n| n.chain) else {
            return Vec::new();
        };
        let mut members: Vec<(i64, FragmentId)> = table
            .nodes
            .iter()
            .filter(|(_, node)| node.chain == chain)
            .map(|(id, node)| (node.rank, *id))
            .collect();
        members.sort_unstable();
        members.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Boundary;

    fn frag(id: i64, previous: Option<i64>, next: Option<i64>) -> Fragment {
        Fragment {
            id: FragmentId(id),
            room_id: "!r:hs".into(),
            start: previous.map_or(Boundary::Gap(format!("s{id}")), |p| {
                Boundary::Linked(FragmentId(p))
            }),
            end: next.map_or(Boundary::Gap(format!("e{id}")), |n| {
                Boundary::Linked(FragmentId(n))
            }),
        }
    }

    fn ids(raw: &[i64]) -> Vec<FragmentId> {
        raw.iter().copied().map(FragmentId).collect()
    }

    #[test]
    fn same_fragment_compares_by_index() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        assert_eq!(
            comparer.compare_positions((FragmentId(1), -3), (FragmentId(1), 2)),
            Ok(Ordering::Less)
        );
        assert_eq!(
            comparer.compare_positions((FragmentId(1), 2), (FragmentId(1), 2)),
            Ok(Ordering::Equal)
        );
    }

    #[test]
    fn prepended_fragment_sorts_first_despite_higher_id() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        // Backward pagination discovered fragment 2 as the predecessor of 1.
        comparer.add_fragment(&frag(2, None, Some(1)));
        assert_eq!(
            comparer.compare_fragments(FragmentId(2), FragmentId(1)),
            Ok(Ordering::Less)
        );
        assert_eq!(comparer.chain(FragmentId(1)), ids(&[2, 1]));
    }

    #[test]
    fn disjoint_chains_are_unorderable() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        comparer.add_fragment(&frag(2, None, None));
        assert_eq!(
            comparer.compare_fragments(FragmentId(1), FragmentId(2)),
            Err(UnorderableError::DisjointChains {
                a: FragmentId(1),
                b: FragmentId(2)
            })
        );
        assert_eq!(
            comparer.compare_fragments(FragmentId(1), FragmentId(9)),
            Err(UnorderableError::UnknownFragment(FragmentId(9)))
        );
        assert!(!comparer.are_connected(FragmentId(1), FragmentId(2)));
    }

    #[test]
    fn relinking_merges_two_chains() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        comparer.add_fragment(&frag(2, None, None));
        comparer.add_fragment(&frag(3, Some(2), None));

        // Fill on fragment 1's end discovers that fragment 2 follows it.
        comparer.add_fragment(&frag(1, None, Some(2)));
        comparer.add_fragment(&frag(2, Some(1), Some(3)));

        assert!(comparer.are_connected(FragmentId(1), FragmentId(3)));
        assert_eq!(comparer.chain(FragmentId(3)), ids(&[1, 2, 3]));
    }

    #[test]
    fn splice_between_neighbours_takes_midpoint() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        comparer.add_fragment(&frag(2, Some(1), None));
        comparer.add_fragment(&frag(3, Some(1), Some(2)));

        let r1 = comparer.rank(FragmentId(1)).expect("rank 1");
        let r2 = comparer.rank(FragmentId(2)).expect("rank 2");
        let r3 = comparer.rank(FragmentId(3)).expect("rank 3");
        assert!(r1 < r3 && r3 < r2);
        assert_eq!(r3, r1 + RANK_STRIDE / 2);
    }

    #[test]
    fn exhausted_rank_space_rebalances_chain() {
        let comparer = FragmentIdComparer::new();
        comparer.add_fragment(&frag(1, None, None));
        comparer.add_fragment(&frag(2, Some(1), None));

        // Keep splicing directly after fragment 1 until the midpoint runs out.
        let mut right = 2;
        for id in 3..30 {
            comparer.add_fragment(&frag(id, Some(1), Some(right)));
            right = id;
        }

        let chain = comparer.chain(FragmentId(1));
        let mut expected = vec![1];
        expected.extend((3..30).rev());
        expected.push(2);
        assert_eq!(chain, ids(&expected));
    }

    #[test]
    fn bulk_load_orders_chains_from_links() {
        let fragments = vec![
            frag(1, Some(3), None),
            frag(2, None, None),
            frag(3, Some(4), Some(1)),
            frag(4, None, Some(3)),
        ];
        let comparer = FragmentIdComparer::from_fragments(&fragments);
        assert_eq!(comparer.chain(FragmentId(1)), ids(&[4, 3, 1]));
        assert_eq!(comparer.chain(FragmentId(2)), ids(&[2]));
        assert_eq!(comparer.len(), 4);
    }
}
