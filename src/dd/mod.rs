//! Minimizing delta debugging over node configurations.
//!
//! This is Zeller's ddmin: split the configuration into `n` subsets, try
//! each subset and each complement, reduce to the first interesting
//! candidate, and refine granularity until nothing helps at single-element
//! granularity. The result is 1-minimal and deterministic as long as the
//! tester is pure.
//!
//! ddmin never tests the empty configuration, so [`ddmin_with_empty`] adds
//! the one missing probe when the result has shrunk to a single unit.

pub mod cache;

use tracing::{debug, info};

use crate::tree::NodeId;

/// One candidate configuration: the ids that stay kept, plus a label used
/// for working-directory isolation and logging.
pub struct Candidate {
    pub label: String,
    pub kept: Vec<NodeId>,
}

/// Evaluates candidates in order and reports the first interesting one.
/// Implementations own materialization, caching, and any parallel fan-out;
/// the algorithm here only sees the winning index.
pub trait CandidateTester {
    fn first_interesting(&mut self, candidates: &[Candidate]) -> Option<usize>;

    /// True when the session has been cancelled; checked between rounds.
    fn cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DdOptions {
    /// Initial number of subsets the configuration is split into.
    pub granularity: usize,
}

impl Default for DdOptions {
    fn default() -> Self {
        Self { granularity: 2 }
    }
}

/// Reduce `config` to a 1-minimal interesting subset.
pub fn ddmin(
    config: &[NodeId],
    opts: &DdOptions,
    tester: &mut impl CandidateTester,
) -> Vec<NodeId> {
    let mut config = config.to_vec();
    let mut n = opts.granularity.max(2).min(config.len());
    let mut round = 0usize;

    while config.len() >= 2 {
        if tester.cancelled() {
            debug!("cancelled; returning the current configuration");
            break;
        }

        let subsets = split(&config, n);
        let mut candidates = Vec::new();
        for (i, subset) in subsets.iter().enumerate() {
            candidates.push(Candidate {
                label: format!("r{}_s{}", round, i),
                kept: subset.clone(),
            });
        }
        // With two subsets each complement equals the other subset.
        if n > 2 {
            for (i, subset) in subsets.iter().enumerate() {
                candidates.push(Candidate {
                    label: format!("r{}_c{}", round, i),
                    kept: complement(&config, subset),
                });
            }
        }

        match tester.first_interesting(&candidates) {
            Some(index) if index < subsets.len() => {
                config = subsets[index].clone();
                debug!(round, kept = config.len(), "reduced to subset");
                n = 2;
            }
            Some(index) => {
                config = candidates[index].kept.clone();
                debug!(round, kept = config.len(), "reduced to complement");
                n = (n - 1).max(2);
            }
            None => {
                if n >= config.len() {
                    break;
                }
                n = (n * 2).min(config.len());
            }
        }
        n = n.min(config.len());
        round += 1;
    }

    info!(kept = config.len(), "ddmin done");
    config
}

/// ddmin plus the empty-configuration probe it structurally skips.
pub fn ddmin_with_empty(
    config: &[NodeId],
    opts: &DdOptions,
    tester: &mut impl CandidateTester,
) -> Vec<NodeId> {
    let reduced = ddmin(config, opts, tester);
    if reduced.len() == 1 && !tester.cancelled() {
        let probe = [Candidate {
            label: "empty".to_string(),
            kept: Vec::new(),
        }];
        if tester.first_interesting(&probe) == Some(0) {
            return Vec::new();
        }
    }
    reduced
}

/// Split into `n` near-equal contiguous subsets.
fn split(config: &[NodeId], n: usize) -> Vec<Vec<NodeId>> {
    let len = config.len();
    let base = len / n;
    let extra = len % n;
    let mut subsets = Vec::with_capacity(n);
    let mut offset = 0;
    for i in 0..n {
        let size = base + usize::from(i < extra);
        if size == 0 {
            continue;
        }
        subsets.push(config[offset..offset + size].to_vec());
        offset += size;
    }
    subsets
}

fn complement(config: &[NodeId], subset: &[NodeId]) -> Vec<NodeId> {
    config
        .iter()
        .filter(|id| !subset.contains(id))
        .copied()
        .collect()
}
