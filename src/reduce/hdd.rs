//! Classic hierarchical delta debugging: level-by-level reduction.

use tracing::info;

use crate::errors::WhittleError;
use crate::reduce::{
    hoist::hoist, level_config, log_pass, prune::prune, sweep_single_removals, ConfigFilter,
    ReduceOptions, Session,
};
use crate::tree::Tree;

/// Reduce the tree level by level; with `hdd_star` the passes repeat until
/// one of them changes nothing.
pub fn hddmin(
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
        for level in 0.. {
            if session.cancelled() {
                break;
            }
            let level_nodes = tree.collect_level(level);
            if level_nodes.is_empty() {
                break;
            }
            let config = level_config(tree, &level_nodes, opts, filter);
            if config.is_empty() {
                continue;
            }
            info!(level, nodes = config.len(), "reducing level");
            let prefix = format!("i{}_l{}", iteration, level);
            if opts.prune {
                changed |= prune(tree, &config, session, opts, &prefix)?;
            }
            if opts.hoist {
                changed |= hoist(tree, &config, session, opts, &prefix)?;
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
