//! Exact path solver for the ordered fused lasso.
//!
//! `argmin_z ½‖z − x‖² + λ·Σ|z_{i+1} − z_i|` is solved by tracking the
//! solution β(λ) as a piecewise-linear function of λ: every coordinate
//! starts as its own group at β_i = x_i, adjacent groups merge at the λ
//! where their linear segments cross, and the answer at the requested λ is
//! read off the surviving segments. Merge events live in a positional
//! min-heap; group membership is a union-find forest over contiguous index
//! ranges, with the array indexed by head-of-group.

use faer::{Col, ColRef};

use crate::prox::ProximalOperator;
use crate::prox::heap::{MergeEvent, MergeHeap};
use crate::{E, I};

/// Two segment slopes closer than this are treated as parallel and never
/// merge.
const SLOPE_EQUALITY_EPS: E = 1e-10;

fn sgn(x: E) -> E {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

/// A maximal run of coordinates sharing one value on the solution path.
#[derive(Debug, Clone, Copy)]
struct Group {
    head: I,
    tail: I,
    parent: I,
    /// Value of the group at `lambda`.
    beta: E,
    /// dβ/dλ of the group.
    slope: E,
    /// λ at which `beta` was last updated.
    lambda: E,
}

/// λ at which the segments of two adjacent groups intersect.
fn crossing(left: &Group, right: &Group) -> E {
    let denom = right.slope - left.slope;
    if denom.abs() < SLOPE_EQUALITY_EPS {
        return E::INFINITY;
    }
    let left_intercept = left.beta - left.slope * left.lambda;
    let right_intercept = right.beta - right.slope * right.lambda;
    (left_intercept - right_intercept) / denom
}

#[derive(Debug, Clone)]
pub(crate) struct FusedGroups {
    groups: Vec<Group>,
    heap: MergeHeap,
}

impl FusedGroups {
    pub fn new(x: ColRef<'_, E>) -> Self {
        let m = x.nrows();
        let mut groups = Vec::with_capacity(m);
        for i in 0..m {
            let mut pull = 0.;
            if i > 0 {
                pull += sgn(x[i] - x[i - 1]);
            }
            if i + 1 < m {
                pull += sgn(x[i] - x[i + 1]);
            }
            groups.push(Group {
                head: i,
                tail: i,
                parent: i,
                beta: x[i],
                slope: -pull,
                lambda: 0.,
            });
        }

        let events = (0..m.saturating_sub(1))
            .map(|i| MergeEvent {
                id: i,
                lambda: crossing(&groups[i], &groups[i + 1]),
            })
            .collect();

        Self {
            groups,
            heap: MergeHeap::new(events, m),
        }
    }

    /// The earliest pending merge, or `None` once a single group remains.
    pub fn next_merge(&self) -> Option<MergeEvent> {
        self.heap.peek()
    }

    /// Root of the group containing index `i`, with path compression.
    fn find(&mut self, i: I) -> I {
        let mut root = i;
        while self.groups[root].parent != root {
            root = self.groups[root].parent;
        }
        let mut cur = i;
        while self.groups[cur].parent != root {
            let next = self.groups[cur].parent;
            self.groups[cur].parent = root;
            cur = next;
        }
        root
    }

    fn prev_group(&mut self, head: I) -> Option<I> {
        if head == 0 { None } else { Some(self.find(head - 1)) }
    }

    fn next_group(&self, head: I) -> Option<I> {
        let tail = self.groups[head].tail;
        if tail + 1 < self.groups.len() {
            Some(tail + 1)
        } else {
            None
        }
    }

    /// Fires the merge event: unions the right neighbour of `ev.id` into it,
    /// refreshes the merged slope, and re-keys the surviving boundaries.
    pub fn merge(&mut self, ev: MergeEvent) {
        let dst = ev.id;
        let Some(src) = self.next_group(dst) else {
            debug_assert!(false, "merge event {dst} has no right neighbour");
            return;
        };

        // advance the left group to the merge point
        let g = &mut self.groups[dst];
        g.beta += g.slope * (ev.lambda - g.lambda);
        g.lambda = ev.lambda;

        // absorb the right group; only head and tail parents need refreshing
        let last = self.groups[src].tail;
        self.groups[dst].tail = last;
        self.groups[src].parent = dst;
        self.groups[last].parent = dst;

        // slope of the merged group, pulled by the surviving neighbours
        let prev = self.prev_group(dst);
        let next = self.next_group(dst);
        let beta = self.groups[dst].beta;
        let mut pull = 0.;
        if let Some(p) = prev {
            pull += sgn(beta - self.groups[p].beta);
        }
        if let Some(n) = next {
            pull += sgn(beta - self.groups[n].beta);
        }
        let size = (self.groups[dst].tail - self.groups[dst].head + 1) as E;
        self.groups[dst].slope = -pull / size;

        // one boundary vanished, at most two changed
        if let Some(p) = prev {
            let lambda = crossing(&self.groups[p], &self.groups[dst]);
            self.heap.change_key(p, lambda);
        }
        if let Some(n) = next {
            let lambda = crossing(&self.groups[dst], &self.groups[n]);
            self.heap.change_key(dst, lambda);
            self.heap.remove(src);
        } else {
            self.heap.remove(dst);
        }
    }

    /// Reads the solution off the surviving segments at the requested λ.
    pub fn beta_at(&self, target: E) -> Col<E> {
        let m = self.groups.len();
        let mut out = Col::<E>::zeros(m);
        let mut i = 0;
        while i < m {
            let g = &self.groups[i];
            let value = g.beta + g.slope * (target - g.lambda);
            for j in g.head..=g.tail {
                out[j] = value;
            }
            i = g.tail + 1;
        }
        out
    }
}

/// Proximal operator of the ordered fused lasso penalty.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedFusedLasso;

impl ProximalOperator for OrderedFusedLasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        Self::solve(x, lambda)
    }
}

impl OrderedFusedLasso {
    pub(crate) fn solve(x: ColRef<'_, E>, lambda: E) -> Col<E> {
        if x.nrows() <= 1 {
            return x.to_owned();
        }
        let mut groups = FusedGroups::new(x);
        while let Some(ev) = groups.next_merge() {
            if ev.lambda >= lambda {
                break;
            }
            groups.merge(ev);
        }
        groups.beta_at(lambda)
    }
}
