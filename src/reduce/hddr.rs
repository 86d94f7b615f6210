//! Recursive hierarchical delta debugging (HDDr).
//!
//! Instead of global breadth-first levels, the tree is walked one subtree
//! at a time and the kept children of each visited node form one DDMIN
//! configuration. The walk is an iterative queue; which end is popped and
//! in which order children are appended select the classic breadth-first
//! traversal, depth-first traversal, or their syntactically reversed
//! twins.

use tracing::info;

use crate::errors::WhittleError;
use crate::reduce::{
    hoist::hoist, level_config, log_pass, prune::prune, sweep_single_removals, ConfigFilter,
    ReduceOptions, Session,
};
use crate::tree::{NodeId, NodeState, Tree};

pub fn hddrmin(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
    filter: Option<ConfigFilter>,
) -> Result<(), WhittleError> {
    for iteration in 0.. {
        tree.check()?;
        log_pass(iteration, tree);
        session.stats.iterations += 1;

        let mut changed = false;
        let mut node_count = 0usize;
        let mut queue = vec![tree.root()];
        while !queue.is_empty() {
            if session.cancelled() {
                break;
            }
            let node = if opts.pop_first {
                queue.remove(0)
            } else {
                queue.pop().expect("queue is non-empty")
            };
            if tree.node(node).state != NodeState::Keep {
                continue;
            }
            let kept_children: Vec<_> = tree
                .node(node)
                .children()
                .iter()
                .copied()
                .filter(|&child| tree.node(child).state == NodeState::Keep)
                .collect();
            let config = level_config(tree, &kept_children, opts, filter);
            if config.is_empty() {
                continue;
            }

            info!(node = %node, children = config.len(), "reducing subtree");
            let prefix = format!("i{}_n{}", iteration, node_count);
            node_count += 1;
            if opts.prune {
                changed |= prune(tree, &config, session, opts, &prefix)?;
            }
            if opts.hoist {
                changed |= hoist(tree, &config, session, opts, &prefix)?;
            }

            let children = tree.node(node).children().to_vec();
            let iter: Box<dyn Iterator<Item = NodeId>> = if opts.append_reversed {
                Box::new(children.into_iter().rev())
            } else {
                Box::new(children.into_iter())
            };
            for child in iter {
                if tree.node(child).state == NodeState::Keep {
                    queue.push(child);
                }
            }
        }

        changed |= sweep_single_removals(
            tree,
            session,
            opts,
            filter,
            &format!("i{}_sweep", iteration),
        )?;

        if !opts.hdd_star || !changed || session.cancelled() {
            break;
        }
    }
    Ok(())
}
