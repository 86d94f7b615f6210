//! The HDD engine: session state, option surface, and the pieces shared by
//! every algorithm variant.
//!
//! The engine itself is single-threaded: it produces a sequence of levels
//! and hands each one to DDMIN. Candidate texts are always materialized
//! before any oracle call fans out, and the tree is only written after a
//! DDMIN round has joined, so oracle calls never observe the tree.

pub mod coarse;
pub mod hdd;
pub mod hddr;
pub mod hoist;
pub mod prune;

use std::collections::HashSet;

use tracing::{debug, info};

use crate::dd::cache::{content_key, OutcomeCache};
use crate::errors::WhittleError;
use crate::oracle::{CancellationToken, Oracle, Verdict};
use crate::tree::{NodeId, NodeKind, NodeState, Tree};
use crate::unparse::Unparser;

/// Which HDD algorithm drives the reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Classic HDD: breadth-first levels.
    Hdd,
    /// HDDr: subtree-at-a-time traversal.
    Hddr,
    /// HDD over nodes whose removal can actually shrink the output.
    CoarseHdd,
    /// HDDr with the same coarse filter.
    CoarseHddr,
    /// Coarse pass first, full HDD afterwards.
    CoarseThenFull,
}

/// Option surface of a reduction session.
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    pub variant: Variant,
    /// Iterate to a fixed point (HDD*).
    pub hdd_star: bool,
    /// Apply pruning at each level.
    pub prune: bool,
    /// Apply hoisting at each level.
    pub hoist: bool,
    /// Initial DDMIN granularity.
    pub granularity: usize,
    /// Worker threads for oracle fan-out; `None` keeps calls sequential.
    pub parallel: Option<usize>,
    /// Emit hidden-channel tokens unconditionally when unparsing.
    pub preserve_hidden: bool,
    /// Offer hidden-channel tokens to the reducer as well.
    pub reduce_hidden: bool,
    /// HDDr traversal: pop the queue from the front (breadth-first) or the
    /// back (depth-first).
    pub pop_first: bool,
    /// HDDr traversal: enqueue children in reverse order.
    pub append_reversed: bool,
    /// Verdict cache capacity; 0 disables caching.
    pub cache_capacity: usize,
    /// Flatten left/right-recursive chains before reduction.
    pub flatten: bool,
    /// Squeeze unary chains before reduction.
    pub squeeze: bool,
    /// Hide nodes whose text already equals their replacement.
    pub hide_unremovable: bool,
    pub cancel: CancellationToken,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            variant: Variant::Hdd,
            hdd_star: true,
            prune: true,
            hoist: false,
            granularity: 2,
            parallel: None,
            preserve_hidden: false,
            reduce_hidden: false,
            pop_first: true,
            append_reversed: false,
            cache_capacity: 50_000,
            flatten: true,
            squeeze: true,
            hide_unremovable: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Counters reported at the end of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub oracle_calls: usize,
    pub cache_hits: usize,
    pub iterations: usize,
}

/// Per-reduction session: the oracle, the verdict cache, cancellation, and
/// counters. At most one session mutates a tree at a time.
pub struct Session<'o> {
    oracle: &'o dyn Oracle,
    cache: OutcomeCache,
    cancel: CancellationToken,
    parallel: Option<usize>,
    pub stats: Stats,
}

impl<'o> Session<'o> {
    pub fn new(oracle: &'o dyn Oracle, opts: &ReduceOptions) -> Self {
        Self {
            oracle,
            cache: OutcomeCache::new(opts.cache_capacity),
            cancel: opts.cancel.clone(),
            parallel: opts.parallel.filter(|&n| n > 1),
            stats: Stats::default(),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Evaluate labelled candidate texts in order and return the index of
    /// the first interesting one. With a parallel worker pool, uncached
    /// candidates are examined concurrently and the cache is written after
    /// the join; the winning index is order-stable either way.
    pub fn evaluate(&mut self, candidates: &[(String, String)]) -> Option<usize> {
        if self.cancelled() {
            return None;
        }
        match self.parallel {
            Some(workers) if candidates.len() > 1 => self.evaluate_parallel(candidates, workers),
            _ => self.evaluate_serial(candidates),
        }
    }

    fn evaluate_serial(&mut self, candidates: &[(String, String)]) -> Option<usize> {
        for (index, (label, text)) in candidates.iter().enumerate() {
            if self.test(label, text).is_interesting() {
                return Some(index);
            }
        }
        None
    }

    fn test(&mut self, label: &str, text: &str) -> Verdict {
        let key = content_key(text);
        if let Some(verdict) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return verdict;
        }
        let verdict = self.oracle.examine(text.as_bytes(), label);
        self.stats.oracle_calls += 1;
        self.cache.insert(key, verdict);
        verdict
    }

    fn evaluate_parallel(
        &mut self,
        candidates: &[(String, String)],
        workers: usize,
    ) -> Option<usize> {
        let mut verdicts: Vec<Option<Verdict>> = vec![None; candidates.len()];
        let mut uncached = Vec::new();
        for (index, (_, text)) in candidates.iter().enumerate() {
            let key = content_key(text);
            match self.cache.get(&key) {
                Some(verdict) => {
                    self.stats.cache_hits += 1;
                    verdicts[index] = Some(verdict);
                }
                None => uncached.push(index),
            }
        }

        if !uncached.is_empty() {
            let oracle = self.oracle;
            let chunk = uncached.len().div_ceil(workers);
            let results: Vec<(usize, Verdict)> = std::thread::scope(|scope| {
                let handles: Vec<_> = uncached
                    .chunks(chunk)
                    .map(|indices| {
                        scope.spawn(move || {
                            indices
                                .iter()
                                .map(|&i| {
                                    let (label, text) = &candidates[i];
                                    (i, oracle.examine(text.as_bytes(), label))
                                })
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|handle| handle.join().expect("oracle worker panicked"))
                    .collect()
            });
            for (index, verdict) in results {
                self.stats.oracle_calls += 1;
                self.cache.insert(content_key(&candidates[index].1), verdict);
                verdicts[index] = Some(verdict);
            }
        }

        verdicts
            .iter()
            .position(|v| v.is_some_and(|v| v.is_interesting()))
    }
}

/// Whether a node may be offered to DDMIN at all.
pub(crate) fn reducible(tree: &Tree, id: NodeId, opts: &ReduceOptions) -> bool {
    match &tree.node(id).kind {
        NodeKind::ErrorToken { .. } => false,
        NodeKind::HiddenToken { .. } => opts.reduce_hidden,
        _ => true,
    }
}

/// Optional per-node filter narrowing a level's configuration (the coarse
/// variants plug in here).
pub type ConfigFilter<'f> = &'f dyn Fn(&Tree, NodeId) -> bool;

pub(crate) fn level_config(
    tree: &Tree,
    nodes: &[NodeId],
    opts: &ReduceOptions,
    filter: Option<ConfigFilter>,
) -> Vec<NodeId> {
    nodes
        .iter()
        .copied()
        .filter(|&id| reducible(tree, id, opts))
        .filter(|&id| filter.map_or(true, |f| f(tree, id)))
        .collect()
}

/// 1-tree-minimality sweep: after a pass, try removing every remaining
/// reducible node on its own and commit the ones the oracle accepts. This
/// covers the set-granularity blind spots of DDMIN.
pub(crate) fn sweep_single_removals(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
    filter: Option<ConfigFilter>,
    prefix: &str,
) -> Result<bool, WhittleError> {
    let mut nodes = Vec::new();
    tree.visit_kept(|id, node| {
        if node.state == NodeState::Keep {
            nodes.push(id);
        }
    });
    let mut changed = false;
    for (i, id) in nodes.into_iter().enumerate() {
        if session.cancelled() {
            break;
        }
        if !reducible(tree, id, opts) || !filter.map_or(true, |f| f(tree, id)) {
            continue;
        }
        if !kept_with_ancestors(tree, id) {
            continue;
        }
        let ids: HashSet<NodeId> = [id].into();
        let kept: HashSet<NodeId> = HashSet::new();
        let text = Unparser::new()
            .with_config(&ids, &kept)
            .preserve_hidden(opts.preserve_hidden)
            .unparse(tree);
        let label = format!("{}_single{}", prefix, i);
        if session.evaluate(&[(label, text)]) == Some(0) {
            debug!(node = %id, "single-node removal accepted");
            tree.set_state(&ids, &kept);
            changed = true;
        }
    }
    Ok(changed)
}

fn kept_with_ancestors(tree: &Tree, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(node_id) = current {
        let node = tree.node(node_id);
        if node.state != NodeState::Keep {
            return false;
        }
        current = node.parent;
    }
    true
}

/// Run the configured variant, iterating to a fixed point when HDD* is on.
pub fn run(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
) -> Result<(), WhittleError> {
    match opts.variant {
        Variant::Hdd => hdd::hddmin(tree, session, opts, None),
        Variant::Hddr => hddr::hddrmin(tree, session, opts, None),
        Variant::CoarseHdd => coarse::coarse_hddmin(tree, session, opts),
        Variant::CoarseHddr => coarse::coarse_hddrmin(tree, session, opts),
        Variant::CoarseThenFull => coarse::coarse_then_full(tree, session, opts),
    }
}

pub(crate) fn log_pass(iteration: usize, tree: &Tree) {
    let shape = crate::tree::info::shape(tree);
    info!(
        iteration,
        height = shape.len(),
        nodes = shape.iter().sum::<usize>(),
        "HDD iteration"
    );
}
